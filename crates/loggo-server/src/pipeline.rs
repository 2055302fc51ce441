//! The ingestion pipeline shared by every transport.
//!
//! `resolve → decode | fields → normalize → persist → publish`
//!
//! Publication happens strictly after the event and its payload are
//! committed. A failed publish never fails the ingest.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use loggo_db::DbPool;
use loggo_events::{
    channel_by_mqtt_topic, channel_by_name, insert_event, Channel, Event, StoreError,
};
use loggo_intake::{decode, normalize, DecodeError, FieldSet, IntakeRecord, NormalizeError};
use loggo_types::CHANNEL_TOPIC_PREFIX;
use rusqlite::Connection;
use thiserror::Error;

use crate::publish::{EventPublisher, PublishError};

/// How the caller names the channel an event is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    /// Exact channel name (HTTP).
    Name(String),
    /// MQTT topic alias, falling back to the lowercased channel name.
    MqttTopic(String),
}

impl ChannelTarget {
    fn describe(&self) -> &str {
        match self {
            Self::Name(name) | Self::MqttTopic(name) => name,
        }
    }
}

/// Why an event was not ingested.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("ingestion failed: {0}")]
    Storage(String),
}

impl From<DecodeError> for IngestError {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<NormalizeError> for IngestError {
    fn from(e: NormalizeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A parsed inbound MQTT topic of the form `channel/<name>[/...][?k=v&...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTopic {
    /// The `<name>` segment, matched against channel topic aliases.
    pub channel: String,
    /// Event fields carried as query parameters, if any.
    pub fields: Option<FieldSet>,
}

/// Parses an inbound MQTT topic.
///
/// Query parameter names are matched without regard to case. A topic
/// without query parameters yields no fields, so its payload goes through
/// the decoder chain.
///
/// # Errors
///
/// Returns [`IngestError::Malformed`] if the topic is not under `channel/`
/// or lacks a channel segment.
pub fn parse_mqtt_topic(topic: &str) -> Result<MqttTopic, IngestError> {
    let (path, query) = match topic.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (topic, None),
    };

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(prefix), Some(channel)) if prefix == CHANNEL_TOPIC_PREFIX => {
            let fields = query
                .map(|q| FieldSet::from_pairs(url::form_urlencoded::parse(q.as_bytes())))
                .filter(|f| !f.is_empty());
            Ok(MqttTopic {
                channel: channel.to_string(),
                fields,
            })
        }
        _ => Err(IngestError::Malformed(format!(
            "unsupported topic {topic:?}, expected {CHANNEL_TOPIC_PREFIX}/<name>"
        ))),
    }
}

/// Ingests events into storage and hands them to the publisher.
///
/// Cheap to share; every call is independent.
pub struct Pipeline {
    pool: DbPool,
    publisher: Arc<dyn EventPublisher>,
}

impl Pipeline {
    pub fn new(pool: DbPool, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { pool, publisher }
    }

    /// Ingests one event.
    ///
    /// With `fields` present and non-empty the record is built from them
    /// and `body`, if non-empty, becomes the attachment. Otherwise `body`
    /// runs through the decoder chain.
    ///
    /// # Errors
    ///
    /// [`IngestError::ChannelNotFound`] when the target resolves to no
    /// channel, [`IngestError::Malformed`] when the event cannot be decoded
    /// or validated, [`IngestError::Storage`] when the write fails.
    pub async fn ingest(
        &self,
        target: ChannelTarget,
        fields: Option<FieldSet>,
        body: Vec<u8>,
    ) -> Result<Event, IngestError> {
        let pool = self.pool.clone();
        let (channel, event) = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| {
                tracing::error!(error = %e, "failed to get database connection for ingest");
                IngestError::Storage(e.to_string())
            })?;
            ingest_blocking(&conn, &target, fields, &body, Utc::now())
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "ingest task panicked or was cancelled");
            IngestError::Storage(e.to_string())
        })??;

        self.publish(&channel, &event);
        Ok(event)
    }

    /// Ingests an MQTT message received on `topic`.
    pub async fn ingest_mqtt(&self, topic: &str, payload: Vec<u8>) -> Result<Event, IngestError> {
        let parsed = parse_mqtt_topic(topic)?;
        self.ingest(ChannelTarget::MqttTopic(parsed.channel), parsed.fields, payload)
            .await
    }

    fn publish(&self, channel: &Channel, event: &Event) {
        if !channel.mqtt_enabled {
            tracing::debug!(channel = %channel.name, "publishing disabled for channel");
            return;
        }
        let topic = channel.publish_topic();
        let result = event
            .to_json()
            .map_err(PublishError::from)
            .and_then(|payload| self.publisher.publish(&topic, &payload));
        if let Err(e) = result {
            tracing::warn!(
                channel = %channel.name,
                topic = %topic,
                event_id = event.id,
                error = %e,
                "failed to publish event"
            );
        }
    }
}

/// Storage-side half of an ingest: resolve, build, normalize and persist.
///
/// Returns the resolved channel with the stored event so the caller can
/// publish it.
pub fn ingest_blocking(
    conn: &Connection,
    target: &ChannelTarget,
    fields: Option<FieldSet>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(Channel, Event), IngestError> {
    let channel = resolve_channel(conn, target)?;

    let record = match fields.filter(|f| !f.is_empty()) {
        Some(fields) => fields.into_record().with_attachment(body),
        None => decode(body)?,
    };
    let new_event = normalize_for(record, &channel, now)?;

    let event = insert_event(conn, &new_event).map_err(|e| {
        tracing::error!(channel = %channel.name, error = %e, "failed to persist event");
        IngestError::Storage(e.to_string())
    })?;
    tracing::debug!(
        channel = %channel.name,
        event_id = event.id,
        has_data = event.has_data,
        "ingested event"
    );
    Ok((channel, event))
}

fn resolve_channel(conn: &Connection, target: &ChannelTarget) -> Result<Channel, IngestError> {
    let result = match target {
        ChannelTarget::Name(name) => channel_by_name(conn, name),
        ChannelTarget::MqttTopic(topic) => channel_by_mqtt_topic(conn, topic),
    };
    result.map_err(|e| match e {
        StoreError::ChannelNotFound(_) => IngestError::ChannelNotFound(target.describe().to_string()),
        other => {
            tracing::error!(channel = target.describe(), error = %other, "failed to resolve channel");
            IngestError::Storage(other.to_string())
        }
    })
}

fn normalize_for(
    record: IntakeRecord,
    channel: &Channel,
    now: DateTime<Utc>,
) -> Result<loggo_events::NewEvent, IngestError> {
    normalize(record, channel.id, now).map_err(|e| {
        tracing::debug!(channel = %channel.name, error = %e, "rejected malformed event");
        e.into()
    })
}
