//! The intake record: an inbound event after decoding, before validation.

use std::collections::HashMap;

/// Field names recognised in headers, query strings and form bodies.
pub const FIELD_NAMES: [&str; 5] = ["source", "level", "timestamp", "title", "message"];

/// An inbound event as decoded from its transport, not yet validated.
///
/// Level and timestamp are still raw strings here; turning them into typed
/// values is the normalizer's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeRecord {
    pub source: String,
    pub level: String,
    pub timestamp: Option<String>,
    pub title: Option<String>,
    pub message: String,
    /// Attached payload bytes, if any.
    pub data: Option<Vec<u8>>,
    /// Content type of the envelope the record was decoded from.
    pub declared_mime_type: Option<String>,
}

impl IntakeRecord {
    /// Attaches `body` as the payload unless it is empty.
    pub fn with_attachment(mut self, body: &[u8]) -> Self {
        self.data = if body.is_empty() {
            None
        } else {
            Some(body.to_vec())
        };
        self
    }
}

/// Event fields carried by transport metadata (headers, topic query
/// parameters, form fields).
///
/// Keys are compared without regard to case, and the first value seen for
/// a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    values: HashMap<String, String>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the recognised fields out of arbitrary key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut fields = Self::new();
        for (key, value) in pairs {
            fields.insert(key.as_ref(), value);
        }
        fields
    }

    /// Records `value` under `key` if the key is a recognised field and has
    /// no value yet.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        if FIELD_NAMES.contains(&key.as_str()) {
            self.values.entry(key).or_insert_with(|| value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds an intake record from these fields. Blank optional fields
    /// count as absent.
    pub fn into_record(self) -> IntakeRecord {
        let optional = |key: &str| {
            self.get(key)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        };
        IntakeRecord {
            source: self.get("source").unwrap_or_default().to_string(),
            level: self.get("level").unwrap_or_default().to_string(),
            timestamp: optional("timestamp"),
            title: optional("title"),
            message: self.get("message").unwrap_or_default().to_string(),
            data: None,
            declared_mime_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive_and_first_value_wins() {
        let fields = FieldSet::from_pairs([
            ("Source", "svc"),
            ("LEVEL", "error"),
            ("level", "info"),
            ("message", "boom"),
            ("unrelated", "ignored"),
        ]);
        assert_eq!(fields.get("source"), Some("svc"));
        assert_eq!(fields.get("Level"), Some("error"));
        assert_eq!(fields.get("unrelated"), None);
    }

    #[test]
    fn record_from_fields_treats_blank_optionals_as_absent() {
        let record = FieldSet::from_pairs([
            ("source", "svc"),
            ("level", "info"),
            ("message", "hi"),
            ("title", ""),
            ("timestamp", "  "),
        ])
        .into_record();
        assert_eq!(record.source, "svc");
        assert_eq!(record.title, None);
        assert_eq!(record.timestamp, None);
        assert_eq!(record.data, None);
    }

    #[test]
    fn empty_attachment_is_no_attachment() {
        let record = IntakeRecord::default().with_attachment(b"");
        assert_eq!(record.data, None);
        let record = IntakeRecord::default().with_attachment(b"abc");
        assert_eq!(record.data.as_deref(), Some(&b"abc"[..]));
    }
}
