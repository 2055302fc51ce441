//! Database layer for the Loggo event server.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table Loggo uses (`channels`,
//! `events`, `event_data`) is created through versioned migrations managed
//! by this crate.
//!
//! Foreign keys are switched on for every pooled connection. Deleting a
//! channel relies on them to cascade through its events and their attached
//! payloads.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
