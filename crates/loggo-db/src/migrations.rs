//! Schema migrations compiled into the binary.
//!
//! The schema version history lives in `_loggo_migrations`, one row per
//! applied step keyed by its version number.

use std::collections::BTreeSet;

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by `version`; append new steps at the end.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 0,
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        version: 1,
        name: "001_events",
        sql: include_str!("migrations/001_events.sql"),
    },
    Migration {
        version: 2,
        name: "002_event_data",
        sql: include_str!("migrations/002_event_data.sql"),
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS _loggo_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to prepare migration history table: {0}")]
    Bootstrap(#[source] rusqlite::Error),

    #[error("failed to check migration state: {0}")]
    StateQuery(#[source] rusqlite::Error),

    /// The step was rolled back; nothing it did is visible.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many steps were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_pending(conn, MIGRATIONS)
}

fn apply_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(VERSION_TABLE)
        .map_err(MigrationError::Bootstrap)?;

    let done = applied_versions(conn)?;
    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(&m.version))
        .collect();

    if pending.is_empty() {
        tracing::debug!(version = done.last().copied(), "schema is up to date");
        return Ok(0);
    }

    for migration in &pending {
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        tracing::info!(
            version = migration.version,
            migration = migration.name,
            "applied migration"
        );
    }
    Ok(pending.len())
}

fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT version FROM _loggo_migrations")
        .map_err(MigrationError::StateQuery)?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .and_then(|rows| rows.collect::<Result<BTreeSet<_>, _>>())
        .map_err(MigrationError::StateQuery)?;
    Ok(versions)
}

/// Runs one step and records it inside the same transaction.
fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _loggo_migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.name],
    )?;
    tx.commit()
}
