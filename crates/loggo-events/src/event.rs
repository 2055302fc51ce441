//! Event persistence and reads.
//!
//! An event and its attached payload are written in one transaction. The
//! `has_data` flag is derived from the presence of the payload at that
//! point and nowhere else.

use chrono::{DateTime, SecondsFormat, Utc};
use loggo_types::{EventLevel, DEFAULT_PAGE_SIZE};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const EVENT_COLUMNS: &str =
    "id, channel_id, created_at, source, level, timestamp, title, message, has_data";

/// An immutable fact belonging to one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub channel_id: i64,
    /// Wall-clock time the event was persisted.
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub level: EventLevel,
    /// Caller-supplied event time, or the ingestion time.
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
    pub message: String,
    pub has_data: bool,
}

impl Event {
    /// Canonical JSON representation, as published to subscribers.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Payload attached to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub event_id: i64,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Payload to store alongside a new event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventData {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A canonical event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub channel_id: i64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub level: EventLevel,
    pub title: Option<String>,
    pub message: String,
    pub data: Option<NewEventData>,
}

impl NewEvent {
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// 1-indexed page selection for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    /// Builds a page, replacing missing or zero values with page 1 and the
    /// default page size.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p >= 1).unwrap_or(1),
            page_size: page_size.filter(|s| *s >= 1).unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    fn offset(self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Formats an instant the way it is stored: RFC 3339, UTC, nanosecond
/// precision. Every stored value has the same width, so string comparison
/// in SQL orders them chronologically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Persists an event and its payload atomically.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if either insert fails; nothing is
/// written in that case.
pub fn insert_event(conn: &Connection, new_event: &NewEvent) -> Result<Event, StoreError> {
    let created_at = Utc::now();
    let tx = conn.unchecked_transaction()?;

    let event = tx.query_row(
        &format!(
            "INSERT INTO events (channel_id, created_at, source, level, timestamp, title, message, has_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING {EVENT_COLUMNS}"
        ),
        params![
            new_event.channel_id,
            format_timestamp(&created_at),
            new_event.source,
            new_event.level.as_str(),
            format_timestamp(&new_event.timestamp),
            new_event.title,
            new_event.message,
            new_event.has_data(),
        ],
        map_row_to_event,
    )?;

    if let Some(data) = &new_event.data {
        tx.execute(
            "INSERT INTO event_data (event_id, data_mime_type, data) VALUES (?1, ?2, ?3)",
            params![event.id, data.mime_type, data.data],
        )?;
    }

    tx.commit()?;
    Ok(event)
}

/// Retrieves an event by ID.
pub fn get_event(conn: &Connection, id: i64) -> Result<Event, StoreError> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
        [id],
        map_row_to_event,
    )
    .optional()?
    .ok_or_else(|| StoreError::EventNotFound(id.to_string()))
}

/// Retrieves several events in one query. Missing IDs are absent from the
/// result.
pub fn events_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Event>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id IN ({placeholders})"
    ))?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), map_row_to_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Fetches the payload of an event, addressed by channel name and event ID.
pub fn get_event_data(
    conn: &Connection,
    channel_name: &str,
    event_id: i64,
) -> Result<EventData, StoreError> {
    conn.query_row(
        "SELECT d.event_id, d.data_mime_type, d.data
         FROM event_data d
         JOIN events e ON e.id = d.event_id
         JOIN channels c ON c.id = e.channel_id
         WHERE c.name = ?1 AND e.id = ?2",
        params![channel_name, event_id],
        |row| {
            Ok(EventData {
                event_id: row.get(0)?,
                mime_type: row.get(1)?,
                data: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::EventNotFound(format!("{channel_name}/{event_id}")))
}

/// Lists a channel's events, newest first.
pub fn list_channel_events(
    conn: &Connection,
    channel_id: i64,
    page: Page,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE channel_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(
        params![channel_id, page.page_size, page.offset()],
        map_row_to_event,
    )?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Lists a channel's events from one source, newest first.
pub fn list_source_events(
    conn: &Connection,
    channel_id: i64,
    source: &str,
    page: Page,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE channel_id = ?1 AND source = ?2
         ORDER BY timestamp DESC, id DESC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let rows = stmt.query_map(
        params![channel_id, source, page.page_size, page.offset()],
        map_row_to_event,
    )?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Deletes a channel's events whose timestamp is at or before `cutoff`.
///
/// Returns the number of events removed. Attached payloads go with them.
pub fn delete_events_before(
    conn: &Connection,
    channel_id: i64,
    cutoff: &DateTime<Utc>,
) -> Result<usize, StoreError> {
    let count = conn.execute(
        "DELETE FROM events WHERE channel_id = ?1 AND timestamp <= ?2",
        params![channel_id, format_timestamp(cutoff)],
    )?;
    Ok(count)
}

fn parse_stored_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn map_row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let level_str: String = row.get(4)?;
    let level: EventLevel = level_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Event {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        created_at: parse_stored_timestamp(2, row.get(2)?)?,
        source: row.get(3)?,
        level,
        timestamp: parse_stored_timestamp(5, row.get(5)?)?,
        title: row.get(6)?,
        message: row.get(7)?,
        has_data: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{create_channel, delete_channel, CreateChannelParams};
    use chrono::{Duration, TimeZone};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        loggo_db::run_migrations(&conn).expect("migrations should succeed");
        conn
    }

    fn new_event(channel_id: i64, source: &str, timestamp: DateTime<Utc>) -> NewEvent {
        NewEvent {
            channel_id,
            timestamp,
            source: source.to_string(),
            level: EventLevel::Info,
            title: None,
            message: "hello".to_string(),
            data: None,
        }
    }

    #[test]
    fn insert_without_data_leaves_no_payload() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("app")).unwrap();
        let event = insert_event(&conn, &new_event(channel.id, "svc", Utc::now())).unwrap();

        assert!(!event.has_data);
        assert!(get_event_data(&conn, "app", event.id)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn insert_with_data_stores_payload() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("app")).unwrap();
        let mut ne = new_event(channel.id, "svc", Utc::now());
        ne.data = Some(NewEventData {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        });
        let event = insert_event(&conn, &ne).unwrap();
        assert!(event.has_data);

        let data = get_event_data(&conn, "app", event.id).unwrap();
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.data, vec![1, 2, 3]);

        assert!(
            get_event_data(&conn, "other", event.id).is_err(),
            "data is addressed through its channel"
        );
    }

    #[test]
    fn insert_into_missing_channel_writes_nothing() {
        let conn = test_db();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let mut ne = new_event(77, "svc", Utc::now());
        ne.data = Some(NewEventData {
            mime_type: "text/plain".to_string(),
            data: b"x".to_vec(),
        });
        assert!(matches!(insert_event(&conn, &ne), Err(StoreError::Database(_))));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_survive_storage_with_full_precision() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("app")).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap() + Duration::nanoseconds(123_456_789);
        let event = insert_event(&conn, &new_event(channel.id, "svc", ts)).unwrap();

        assert_eq!(event.timestamp, ts);
        assert_eq!(get_event(&conn, event.id).unwrap(), event);
    }

    #[test]
    fn listings_are_newest_first_and_paginated() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("app")).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            let source = if i % 2 == 0 { "even" } else { "odd" };
            insert_event(&conn, &new_event(channel.id, source, base + Duration::minutes(i))).unwrap();
        }

        let first = list_channel_events(&conn, channel.id, Page::new(Some(1), Some(2))).unwrap();
        assert_eq!(
            first.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![base + Duration::minutes(4), base + Duration::minutes(3)]
        );
        let last = list_channel_events(&conn, channel.id, Page::new(Some(3), Some(2))).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].timestamp, base);

        let odd = list_source_events(&conn, channel.id, "odd", Page::default()).unwrap();
        assert_eq!(odd.len(), 2);
        assert!(odd.iter().all(|e| e.source == "odd"));
        assert!(odd[0].timestamp > odd[1].timestamp);
    }

    #[test]
    fn page_defaults() {
        assert_eq!(Page::new(None, None), Page { page: 1, page_size: 20 });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, page_size: 20 });
        assert_eq!(Page::new(Some(3), Some(5)).offset(), 10);
    }

    #[test]
    fn delete_before_cutoff_is_inclusive_and_scoped() {
        let conn = test_db();
        let a = create_channel(&conn, &CreateChannelParams::named("a")).unwrap();
        let b = create_channel(&conn, &CreateChannelParams::named("b")).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        insert_event(&conn, &new_event(a.id, "s", cutoff - Duration::hours(1))).unwrap();
        insert_event(&conn, &new_event(a.id, "s", cutoff)).unwrap();
        let kept = insert_event(&conn, &new_event(a.id, "s", cutoff + Duration::seconds(1))).unwrap();
        insert_event(&conn, &new_event(b.id, "s", cutoff - Duration::hours(1))).unwrap();

        assert_eq!(delete_events_before(&conn, a.id, &cutoff).unwrap(), 2);
        assert_eq!(delete_events_before(&conn, a.id, &cutoff).unwrap(), 0);

        let remaining = list_channel_events(&conn, a.id, Page::default()).unwrap();
        assert_eq!(remaining, vec![kept]);
        assert_eq!(list_channel_events(&conn, b.id, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn deleting_channel_removes_its_events() {
        let conn = test_db();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let channel = create_channel(&conn, &CreateChannelParams::named("gone")).unwrap();
        let mut ne = new_event(channel.id, "svc", Utc::now());
        ne.data = Some(NewEventData {
            mime_type: "text/plain".to_string(),
            data: b"bye".to_vec(),
        });
        let event = insert_event(&conn, &ne).unwrap();

        delete_channel(&conn, channel.id).unwrap();
        assert!(get_event(&conn, event.id).unwrap_err().is_not_found());
        let data_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM event_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(data_rows, 0);
    }

    #[test]
    fn canonical_json_round_trips() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("app")).unwrap();
        let mut ne = new_event(channel.id, "svc", Utc::now());
        ne.title = Some("Title".to_string());
        let event = insert_event(&conn, &ne).unwrap();

        let json = event.to_json().unwrap();
        let decoded: Event = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, event);

        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["has_data"], false);
    }
}
