//! Per-channel TTL enforcement.
//!
//! One sweep walks every channel, works out its retention window, and
//! deletes events older than that window. A channel whose TTL cannot be
//! parsed, or whose delete fails, is reported and skipped; the remaining
//! channels are still swept.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::channel::list_channels;
use crate::error::StoreError;
use crate::event::delete_events_before;

/// Outcome of one retention sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Channels whose expired events were deleted (possibly zero of them).
    pub channels_swept: usize,
    /// Total events deleted across all channels.
    pub events_deleted: usize,
    /// Channels skipped because of an invalid TTL or a failed delete.
    pub channels_failed: Vec<String>,
}

/// Runs one retention sweep over every channel.
///
/// `default_ttl` applies to channels without their own TTL. Events with a
/// timestamp at or before `now - ttl` are deleted.
///
/// # Errors
///
/// Only failing to list the channels aborts the sweep. Per-channel
/// failures are logged and recorded in the report.
pub fn sweep_expired_events(
    conn: &Connection,
    default_ttl: &str,
    now: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let channels = list_channels(conn)?;
    let mut report = SweepReport::default();

    for channel in channels {
        let ttl = match channel.effective_ttl(default_ttl) {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::warn!(
                    channel = %channel.name,
                    error = %e,
                    "unable to process ttl, events will not be purged"
                );
                report.channels_failed.push(channel.name);
                continue;
            }
        };

        let cutoff = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => {
                tracing::debug!(channel = %channel.name, "ttl reaches past the earliest timestamp, nothing to purge");
                report.channels_swept += 1;
                continue;
            }
        };

        match delete_events_before(conn, channel.id, &cutoff) {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(channel = %channel.name, count, "purged expired events");
                }
                report.channels_swept += 1;
                report.events_deleted += count;
            }
            Err(e) => {
                tracing::error!(
                    channel = %channel.name,
                    error = %e,
                    "database error purging events"
                );
                report.channels_failed.push(channel.name);
            }
        }
    }

    Ok(report)
}
