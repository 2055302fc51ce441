//! SQLite pool construction.
//!
//! Every connection handed out by the pool has already been switched to WAL
//! journaling with foreign keys on and the configured busy timeout applied.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;

/// Pool of SQLite connections shared by the HTTP handlers and background tasks.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Tunables that come from the `[database]` configuration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Upper bound on pooled connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database directory: {0}")]
    Directory(#[from] std::io::Error),

    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens (or creates) the database at `db_path` and returns a pool over it.
///
/// `:memory:` gives a private in-memory database per connection, which is
/// only useful with `pool_max_size = 1` in tests. For file paths, missing
/// parent directories are created first.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let in_memory = is_in_memory(db_path);
    if !in_memory {
        ensure_parent_dir(Path::new(db_path))?;
    }

    let manager = if in_memory {
        SqliteConnectionManager::memory()
    } else {
        SqliteConnectionManager::file(db_path)
    };

    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);
    let manager = manager.with_init(move |conn| prepare_connection(conn, busy_timeout, in_memory));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size.max(1))
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "database pool ready"
    );
    Ok(pool)
}

fn is_in_memory(db_path: &str) -> bool {
    db_path == ":memory:" || db_path.is_empty()
}

fn ensure_parent_dir(db_path: &Path) -> std::io::Result<()> {
    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            tracing::info!(dir = %dir.display(), "creating database directory");
            std::fs::create_dir_all(dir)
        }
        _ => Ok(()),
    }
}

/// Applies per-connection pragmas. In-memory databases cannot use WAL, so
/// journal mode is left alone for them.
fn prepare_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    in_memory: bool,
) -> rusqlite::Result<()> {
    if !in_memory {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %mode, "database did not switch to WAL journaling");
        }
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}
