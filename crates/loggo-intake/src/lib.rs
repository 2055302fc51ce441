//! Inbound event intake for the Loggo event server.
//!
//! Turns whatever arrived over a transport into a canonical
//! [`loggo_events::NewEvent`]:
//!
//! 1. [`decode`] runs an opaque payload through the JSON → XML → YAML →
//!    TOML fallback chain, or a [`FieldSet`] collected from headers and
//!    query parameters is turned into a record directly.
//! 2. [`normalize`] validates the level, resolves the timestamp and sniffs
//!    the type of any attached payload.
//!
//! Nothing here touches storage; both steps are pure and safe to run
//! concurrently.

mod decode;
mod normalize;
mod record;
mod sniff;

pub use decode::{decode, Codec, DecodeError, CODECS};
pub use normalize::{normalize, parse_timestamp, NormalizeError};
pub use record::{FieldSet, IntakeRecord, FIELD_NAMES};
pub use sniff::sniff_mime_type;
