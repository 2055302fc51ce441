//! Shared types and constants for the Loggo event server.
//!
//! This crate holds the definitions every other Loggo crate agrees on:
//! the closed [`EventLevel`] enumeration, the Go-style duration syntax used
//! for channel TTLs, and the constants that shape pagination and payload
//! sniffing.
//!
//! It depends on nothing inside the workspace, which keeps the dependency
//! graph acyclic.

mod duration;

pub use duration::{parse_duration, DurationParseError};

use serde::{Deserialize, Serialize};

/// Default number of rows per page for paginated listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on the number of payload bytes inspected when sniffing a
/// MIME type (1 MiB).
pub const SNIFF_LIMIT_BYTES: usize = 1024 * 1024;

/// Default retention window applied to channels without a TTL override.
pub const DEFAULT_ENTRY_TTL: &str = "672h";

/// Prefix of every topic events are published on and ingested from.
pub const CHANNEL_TOPIC_PREFIX: &str = "channel";

/// Returns the topic alias a channel uses when none has been configured.
///
/// The implicit alias is the lowercased channel name.
pub fn default_topic(channel_name: &str) -> String {
    channel_name.to_lowercase()
}

/// Severity of an event.
///
/// Stored and transmitted as its lowercase label. Any other label is
/// rejected at the boundary, so a value of this type is always a member of
/// the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl EventLevel {
    /// Every level, least severe first.
    pub const ALL: [EventLevel; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Fatal,
    ];

    /// Returns the canonical label for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Error returned when a string is not one of the known level labels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} is not a valid event level")]
pub struct ParseLevelError(pub String);
