//! Background task for enforcing per-channel event retention.

use chrono::Utc;
use chrono_tz::Tz;
use loggo_db::DbPool;
use loggo_events::{sweep_expired_events, StoreError, SweepReport};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Why a whole sweep could not run.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("retention sweep panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs one retention sweep over every channel on the blocking pool.
pub async fn run_retention_sweep(
    pool: DbPool,
    default_ttl: String,
) -> Result<SweepReport, RetentionError> {
    tokio::task::spawn_blocking(move || -> Result<SweepReport, RetentionError> {
        let conn = pool.get()?;
        Ok(sweep_expired_events(&conn, &default_ttl, Utc::now())?)
    })
    .await?
}

/// Starts a background task that periodically deletes expired events.
///
/// This task runs indefinitely; dropping or aborting it simply stops the
/// timer.
///
/// # Arguments
///
/// * `pool` - Database connection pool.
/// * `default_ttl` - TTL for channels without their own.
/// * `interval_seconds` - Time in seconds to wait between sweeps.
/// * `tz` - Timezone sweep times are reported in.
pub async fn start_retention_task(pool: DbPool, default_ttl: String, interval_seconds: u64, tz: Tz) {
    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(
        interval_seconds,
        default_ttl = %default_ttl,
        "starting event retention task"
    );

    loop {
        sleep(interval).await;

        let started = Utc::now().with_timezone(&tz);
        match run_retention_sweep(pool.clone(), default_ttl.clone()).await {
            Ok(report) => {
                if report.events_deleted > 0 || !report.channels_failed.is_empty() {
                    tracing::info!(
                        started = %started,
                        channels = report.channels_swept,
                        deleted = report.events_deleted,
                        failed = ?report.channels_failed,
                        "retention sweep finished"
                    );
                } else {
                    tracing::debug!(started = %started, channels = report.channels_swept, "no expired events to delete");
                }
            }
            Err(e) => {
                tracing::error!(started = %started, error = %e, "retention sweep failed");
            }
        }
    }
}
