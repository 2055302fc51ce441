//! Format decoding: raw bytes to an [`IntakeRecord`].
//!
//! The payload is offered to each codec in a fixed order (JSON, XML, YAML,
//! TOML) and the first one whose parser succeeds wins. Success means the
//! parser produced the event shape; there is no further schema check, so a
//! payload that happens to parse under an earlier codec is attributed to
//! it. Each attempt starts from the raw bytes; nothing carries over between
//! attempts.
//!
//! An optional `data` field carries the attachment as base64. A value that
//! is not valid base64 is kept as its literal UTF-8 bytes.

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::record::IntakeRecord;

/// The event shape every codec decodes into.
#[derive(Debug, Deserialize)]
struct WireEvent {
    source: String,
    level: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    title: Option<String>,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

/// One entry of the fallback chain.
pub struct Codec {
    pub name: &'static str,
    pub mime_type: &'static str,
    decode: fn(&[u8]) -> Result<WireEvent, String>,
}

/// The codecs tried by [`decode`], in order.
pub static CODECS: [Codec; 4] = [
    Codec {
        name: "json",
        mime_type: "application/json",
        decode: decode_json,
    },
    Codec {
        name: "xml",
        mime_type: "application/xml",
        decode: decode_xml,
    },
    Codec {
        name: "yaml",
        mime_type: "application/yaml",
        decode: decode_yaml,
    },
    Codec {
        name: "toml",
        mime_type: "application/toml",
        decode: decode_toml,
    },
];

/// Returned when no codec accepts the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to decode event payload as {}", codec_list(.attempts))]
pub struct DecodeError {
    /// Each codec tried, with the reason it rejected the payload.
    pub attempts: Vec<(&'static str, String)>,
}

fn codec_list(attempts: &[(&'static str, String)]) -> String {
    attempts
        .iter()
        .map(|(codec, _)| *codec)
        .collect::<Vec<_>>()
        .join(", ")
}

fn decode_json(bytes: &[u8]) -> Result<WireEvent, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

fn decode_xml(bytes: &[u8]) -> Result<WireEvent, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    quick_xml::de::from_str(text).map_err(|e| e.to_string())
}

fn decode_yaml(bytes: &[u8]) -> Result<WireEvent, String> {
    serde_yaml::from_slice(bytes).map_err(|e| e.to_string())
}

fn decode_toml(bytes: &[u8]) -> Result<WireEvent, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    toml::from_str(text).map_err(|e| e.to_string())
}

fn attachment(data: Option<String>) -> Option<Vec<u8>> {
    let data = data?;
    if data.is_empty() {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .unwrap_or_else(|_| data.into_bytes());
    Some(bytes)
}

/// Decodes `bytes` with the first codec that accepts them.
///
/// # Errors
///
/// Returns [`DecodeError`] listing every codec's rejection when none
/// accepts the payload.
pub fn decode(bytes: &[u8]) -> Result<IntakeRecord, DecodeError> {
    let mut attempts = Vec::with_capacity(CODECS.len());

    for codec in &CODECS {
        match (codec.decode)(bytes) {
            Ok(wire) => {
                tracing::debug!(codec = codec.name, "decoded event payload");
                return Ok(IntakeRecord {
                    source: wire.source,
                    level: wire.level,
                    timestamp: wire.timestamp.filter(|t| !t.trim().is_empty()),
                    title: wire.title,
                    message: wire.message,
                    data: attachment(wire.data),
                    declared_mime_type: Some(codec.mime_type.to_string()),
                });
            }
            Err(reason) => attempts.push((codec.name, reason)),
        }
    }

    Err(DecodeError { attempts })
}
