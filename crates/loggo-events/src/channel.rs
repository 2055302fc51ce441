//! Channel records and channel resolution.
//!
//! A channel's MQTT and ntfy topic aliases are optional in storage. When an
//! alias is unset the channel answers to its lowercased name instead; that
//! default is filled in every time a row is read and never written back.

use std::time::Duration;

use loggo_types::{default_topic, parse_duration};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const CHANNEL_COLUMNS: &str = "id, uuid, name, ttl, mqtt_enabled, mqtt_topic, ntfy_enabled, ntfy_topic";

/// A named logical event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID.
    pub uuid: String,
    /// Unique, case-sensitive channel name.
    pub name: String,
    /// Retention override in Go duration syntax (`None` = server default).
    pub ttl: Option<String>,
    /// Whether events are published to MQTT subscribers.
    #[serde(rename = "mqtt")]
    pub mqtt_enabled: bool,
    /// Effective MQTT topic alias.
    pub mqtt_topic: String,
    /// Whether events are pushed to ntfy subscribers.
    #[serde(rename = "ntfy")]
    pub ntfy_enabled: bool,
    /// Effective ntfy topic alias.
    pub ntfy_topic: String,
}

impl Channel {
    /// Resolves the retention window for this channel.
    ///
    /// The channel's own TTL wins; otherwise `default_ttl` applies.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTtl`] if the chosen TTL string does not
    /// parse.
    pub fn effective_ttl(&self, default_ttl: &str) -> Result<Duration, StoreError> {
        let ttl = self.ttl.as_deref().unwrap_or(default_ttl);
        parse_duration(ttl).map_err(|source| StoreError::InvalidTtl {
            channel: self.name.clone(),
            ttl: ttl.to_string(),
            source,
        })
    }

    /// Topic events of this channel are published on.
    pub fn publish_topic(&self) -> String {
        format!("/{}/{}", loggo_types::CHANNEL_TOPIC_PREFIX, self.mqtt_topic)
    }
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateChannelParams {
    pub name: String,
    #[serde(default)]
    pub ttl: Option<String>,
    #[serde(default = "enabled")]
    pub mqtt_enabled: bool,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default = "enabled")]
    pub ntfy_enabled: bool,
    #[serde(default)]
    pub ntfy_topic: Option<String>,
}

fn enabled() -> bool {
    true
}

impl CreateChannelParams {
    /// Parameters for a channel with every setting at its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
            mqtt_enabled: true,
            mqtt_topic: None,
            ntfy_enabled: true,
            ntfy_topic: None,
        }
    }
}

/// Creates a new channel and returns it.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQL failure, including a unique
/// constraint violation when the name is already taken.
pub fn create_channel(conn: &Connection, params: &CreateChannelParams) -> Result<Channel, StoreError> {
    let uuid = uuid::Uuid::new_v4().to_string();
    let channel = conn.query_row(
        &format!(
            "INSERT INTO channels (uuid, name, ttl, mqtt_enabled, mqtt_topic, ntfy_enabled, ntfy_topic)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING {CHANNEL_COLUMNS}"
        ),
        params![
            uuid,
            params.name,
            params.ttl,
            params.mqtt_enabled,
            params.mqtt_topic,
            params.ntfy_enabled,
            params.ntfy_topic,
        ],
        map_row_to_channel,
    )?;
    Ok(channel)
}

/// Creates the channel unless one with the same name already exists.
///
/// Returns the stored channel and whether it was created by this call.
pub fn ensure_channel(
    conn: &Connection,
    params: &CreateChannelParams,
) -> Result<(Channel, bool), StoreError> {
    match channel_by_name(conn, &params.name) {
        Ok(existing) => Ok((existing, false)),
        Err(StoreError::ChannelNotFound(_)) => Ok((create_channel(conn, params)?, true)),
        Err(e) => Err(e),
    }
}

/// Retrieves several channels in one query. Missing IDs are simply absent
/// from the result.
pub fn channels_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Channel>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id IN ({placeholders})"
    ))?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), map_row_to_channel)?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

/// Lists all channels ordered by name.
pub fn list_channels(conn: &Connection) -> Result<Vec<Channel>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name ASC"
    ))?;
    let rows = stmt.query_map([], map_row_to_channel)?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

/// Deletes a channel together with all of its events and their data.
pub fn delete_channel(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let count = conn.execute("DELETE FROM channels WHERE id = ?1", [id])?;
    if count == 0 {
        return Err(StoreError::ChannelNotFound(id.to_string()));
    }
    Ok(())
}

/// Resolves a channel by its exact, case-sensitive name.
///
/// Used by HTTP ingestion. Names are compared with `=`, so characters such
/// as `%` or `_` have no wildcard meaning.
pub fn channel_by_name(conn: &Connection, name: &str) -> Result<Channel, StoreError> {
    conn.query_row(
        &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?1"),
        [name],
        map_row_to_channel,
    )
    .optional()?
    .ok_or_else(|| StoreError::ChannelNotFound(name.to_string()))
}

/// Resolves a channel from an MQTT topic segment.
///
/// The topic matches the channel's explicit MQTT alias, or its name when no
/// alias is set. Both comparisons ignore ASCII case, so the lowercased name
/// resolves the same channel as the name itself. An explicit alias wins
/// over a name fallback.
pub fn channel_by_mqtt_topic(conn: &Connection, topic: &str) -> Result<Channel, StoreError> {
    channel_by_topic(conn, "mqtt_topic", topic)
}

/// Resolves a channel from an ntfy topic, with the same rules as
/// [`channel_by_mqtt_topic`].
pub fn channel_by_ntfy_topic(conn: &Connection, topic: &str) -> Result<Channel, StoreError> {
    channel_by_topic(conn, "ntfy_topic", topic)
}

fn channel_by_topic(conn: &Connection, column: &str, topic: &str) -> Result<Channel, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels
             WHERE ({column} = ?1 COLLATE NOCASE)
                OR ({column} IS NULL AND name = ?1 COLLATE NOCASE)
             ORDER BY ({column} IS NOT NULL) DESC, id ASC
             LIMIT 1"
        ),
        [topic],
        map_row_to_channel,
    )
    .optional()?
    .ok_or_else(|| StoreError::ChannelNotFound(topic.to_string()))
}

pub(crate) fn map_row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    let name: String = row.get(2)?;
    let mqtt_topic: Option<String> = row.get(5)?;
    let ntfy_topic: Option<String> = row.get(7)?;
    Ok(Channel {
        id: row.get(0)?,
        uuid: row.get(1)?,
        mqtt_topic: mqtt_topic.unwrap_or_else(|| default_topic(&name)),
        ntfy_topic: ntfy_topic.unwrap_or_else(|| default_topic(&name)),
        name,
        ttl: row.get(3)?,
        mqtt_enabled: row.get(4)?,
        ntfy_enabled: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        loggo_db::run_migrations(&conn).expect("migrations should succeed");
        conn
    }

    #[test]
    fn unset_aliases_default_to_lowercased_name() {
        let conn = test_db();
        let created = create_channel(&conn, &CreateChannelParams::named("App-Logs")).unwrap();
        assert_eq!(created.mqtt_topic, "app-logs");
        assert_eq!(created.ntfy_topic, "app-logs");

        let stored: Option<String> = conn
            .query_row("SELECT mqtt_topic FROM channels WHERE id = ?1", [created.id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(stored, None, "the default alias is never persisted");
    }

    #[test]
    fn name_lookup_is_exact_and_case_sensitive() {
        let conn = test_db();
        create_channel(&conn, &CreateChannelParams::named("App-Logs")).unwrap();
        create_channel(&conn, &CreateChannelParams::named("app_x")).unwrap();

        assert_eq!(channel_by_name(&conn, "App-Logs").unwrap().name, "App-Logs");
        assert!(matches!(
            channel_by_name(&conn, "app-logs"),
            Err(StoreError::ChannelNotFound(_))
        ));
        assert!(
            channel_by_name(&conn, "app%").is_err(),
            "wildcards have no special meaning"
        );
        assert!(channel_by_name(&conn, "appyx").is_err());
    }

    #[test]
    fn lowercased_name_resolves_like_the_name_itself() {
        let conn = test_db();
        for name in ["App-Logs", "metrics", "Billing.Service"] {
            create_channel(&conn, &CreateChannelParams::named(name)).unwrap();
        }

        for name in ["App-Logs", "metrics", "Billing.Service"] {
            let by_name = channel_by_name(&conn, name).unwrap();
            let by_topic = channel_by_mqtt_topic(&conn, &default_topic(name)).unwrap();
            assert_eq!(by_name, by_topic);
            let by_ntfy = channel_by_ntfy_topic(&conn, &default_topic(name)).unwrap();
            assert_eq!(by_name, by_ntfy);
        }
    }

    #[test]
    fn explicit_alias_replaces_name_for_topic_lookup() {
        let conn = test_db();
        let mut params = CreateChannelParams::named("payments");
        params.mqtt_topic = Some("pay".to_string());
        let created = create_channel(&conn, &params).unwrap();

        assert_eq!(channel_by_mqtt_topic(&conn, "pay").unwrap().id, created.id);
        assert!(
            channel_by_mqtt_topic(&conn, "payments").is_err(),
            "name fallback only applies when no alias is set"
        );
        // The ntfy alias is still unset, so the name resolves there.
        assert_eq!(channel_by_ntfy_topic(&conn, "payments").unwrap().id, created.id);
        assert_eq!(created.publish_topic(), "/channel/pay");
    }

    #[test]
    fn unknown_topic_is_not_found() {
        let conn = test_db();
        assert!(matches!(
            channel_by_mqtt_topic(&conn, "nothing"),
            Err(StoreError::ChannelNotFound(t)) if t == "nothing"
        ));
    }

    #[test]
    fn effective_ttl_prefers_override() {
        let conn = test_db();
        let mut params = CreateChannelParams::named("short");
        params.ttl = Some("1h".to_string());
        let short = create_channel(&conn, &params).unwrap();
        let plain = create_channel(&conn, &CreateChannelParams::named("plain")).unwrap();

        assert_eq!(short.effective_ttl("672h").unwrap(), Duration::from_secs(3600));
        assert_eq!(
            plain.effective_ttl("672h").unwrap(),
            Duration::from_secs(672 * 3600)
        );

        let mut broken = plain.clone();
        broken.ttl = Some("a while".to_string());
        assert!(matches!(
            broken.effective_ttl("672h"),
            Err(StoreError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn list_orders_by_name_and_batch_skips_missing() {
        let conn = test_db();
        let b = create_channel(&conn, &CreateChannelParams::named("bravo")).unwrap();
        let a = create_channel(&conn, &CreateChannelParams::named("alpha")).unwrap();

        let names: Vec<String> = list_channels(&conn).unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "bravo"]);

        let found = channels_by_ids(&conn, &[a.id, b.id, 999]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(channels_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn ensure_channel_is_idempotent() {
        let conn = test_db();
        let (first, created) = ensure_channel(&conn, &CreateChannelParams::named("seed")).unwrap();
        assert!(created);
        let (second, created) = ensure_channel(&conn, &CreateChannelParams::named("seed")).unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let conn = test_db();
        create_channel(&conn, &CreateChannelParams::named("dup")).unwrap();
        assert!(matches!(
            create_channel(&conn, &CreateChannelParams::named("dup")),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn delete_missing_channel_is_not_found() {
        let conn = test_db();
        assert!(delete_channel(&conn, 42).unwrap_err().is_not_found());
    }
}
