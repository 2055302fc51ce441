//! Error types for channel and event storage.

use loggo_types::DurationParseError;

/// Errors that can occur during channel or event operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("event not found: {0}")]
    EventNotFound(String),
    #[error("invalid ttl {ttl:?} for channel {channel:?}: {source}")]
    InvalidTtl {
        channel: String,
        ttl: String,
        source: DurationParseError,
    },
}

impl StoreError {
    /// Whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound(_) | Self::EventNotFound(_))
    }
}

/// Per-id outcome of a batched lookup.
///
/// Cloneable so a memoized result can be handed out any number of times
/// within one request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("batched {kind} lookup failed: {message}")]
    Storage { kind: &'static str, message: String },
}
