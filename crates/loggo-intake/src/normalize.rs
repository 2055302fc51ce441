//! Event normalization: intake record to canonical, storable event.

use chrono::{DateTime, Utc};
use loggo_events::{NewEvent, NewEventData};
use loggo_types::{EventLevel, ParseLevelError};
use thiserror::Error;

use crate::record::IntakeRecord;
use crate::sniff::sniff_mime_type;

/// Reasons an intake record cannot become an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    InvalidLevel(#[from] ParseLevelError),
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parses a caller-supplied event time as RFC 3339, with or without
/// fractional seconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| NormalizeError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Turns `record` into an event of channel `channel_id`.
///
/// `now` is used as the event time when the record carries none. An
/// attached payload has its MIME type sniffed from its bytes; the content
/// type of the envelope it arrived in is not trusted for it.
///
/// # Errors
///
/// Returns [`NormalizeError`] for an unknown level, an unparsable
/// timestamp, or a blank source or message.
pub fn normalize(
    record: IntakeRecord,
    channel_id: i64,
    now: DateTime<Utc>,
) -> Result<NewEvent, NormalizeError> {
    if record.source.trim().is_empty() {
        return Err(NormalizeError::MissingField("source"));
    }
    if record.message.trim().is_empty() {
        return Err(NormalizeError::MissingField("message"));
    }
    let level: EventLevel = record.level.parse()?;

    let timestamp = match record.timestamp.as_deref().map(str::trim) {
        Some(ts) if !ts.is_empty() => parse_timestamp(ts)?,
        _ => now,
    };

    let data = record.data.map(|bytes| {
        let mime_type = sniff_mime_type(&bytes);
        tracing::debug!(
            mime_type = %mime_type,
            envelope = record.declared_mime_type.as_deref().unwrap_or("none"),
            size = bytes.len(),
            "sniffed attachment type"
        );
        NewEventData {
            mime_type,
            data: bytes,
        }
    });

    Ok(NewEvent {
        channel_id,
        timestamp,
        source: record.source,
        level,
        title: record.title,
        message: record.message,
        data,
    })
}
