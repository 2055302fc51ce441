//! Read-only query API over channels and events.
//!
//! Each request builds its own [`Loaders`] and passes them explicitly
//! through a [`Resolver`]; nothing is cached across requests.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json, Path, Query};
use loggo_events::{
    list_channel_events, list_channels, list_source_events, Channel, Event, LoadError, Loaders,
    Page,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Upper bound on `page_size` to keep responses bounded.
const MAX_PAGE_SIZE: u32 = 200;

/// An event as returned by the query API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    /// The channel the event belongs to.
    pub channel: Channel,
    /// Where the attachment can be fetched, if the event has one.
    pub data_url: Option<String>,
}

/// Resolves stored rows into API views for one request.
pub struct Resolver<'c> {
    loaders: Loaders<'c>,
    base_url: &'c str,
}

impl<'c> Resolver<'c> {
    pub fn new(loaders: Loaders<'c>, base_url: &'c str) -> Self {
        Self { loaders, base_url }
    }

    pub fn channel(&mut self, id: i64) -> Result<Channel, LoadError> {
        self.loaders.channels.load(id)
    }

    pub fn event(&mut self, id: i64) -> Result<EventView, LoadError> {
        let event = self.loaders.events.load(id)?;
        self.view(event)
    }

    /// Builds views for `events`, fetching all of their channels in one batch.
    pub fn views(&mut self, events: Vec<Event>) -> Result<Vec<EventView>, LoadError> {
        self.loaders
            .channels
            .enqueue_many(events.iter().map(|e| e.channel_id));
        events.into_iter().map(|e| self.view(e)).collect()
    }

    /// Views for `ids` in input order; unknown IDs yield `None`.
    pub fn events_by_ids(&mut self, ids: &[i64]) -> Result<Vec<Option<EventView>>, LoadError> {
        let loaded = self.loaders.events.load_many(ids);
        let mut found = Vec::with_capacity(loaded.len());
        for result in &loaded {
            match result {
                Ok(event) => self.loaders.channels.enqueue(event.channel_id),
                Err(LoadError::NotFound { .. }) => {}
                Err(e) => return Err(e.clone()),
            }
        }
        for result in loaded {
            found.push(match result {
                Ok(event) => Some(self.view(event)?),
                Err(_) => None,
            });
        }
        Ok(found)
    }

    /// Number of batched queries issued so far, channels and events combined.
    pub fn batches_dispatched(&self) -> usize {
        self.loaders.channels.batches_dispatched() + self.loaders.events.batches_dispatched()
    }

    fn view(&mut self, event: Event) -> Result<EventView, LoadError> {
        let channel = self.loaders.channels.load(event.channel_id)?;
        let data_url = if event.has_data {
            event_data_url(self.base_url, &channel.name, event.id)
        } else {
            None
        };
        Ok(EventView {
            event,
            channel,
            data_url,
        })
    }
}

/// `<base_url>/channel/<name>/event/<id>/data/` with every segment
/// percent-encoded. `None` if `base_url` cannot carry a path.
pub fn event_data_url(base_url: &str, channel_name: &str, event_id: i64) -> Option<String> {
    let mut url = match Url::parse(base_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(base_url, error = %e, "invalid base URL, omitting data link");
            return None;
        }
    };
    url.path_segments_mut().ok()?.pop_if_empty().extend([
        "channel",
        channel_name,
        "event",
        event_id.to_string().as_str(),
        "data",
        "",
    ]);
    Some(url.into())
}

/// Query parameters for event listings.
#[derive(Debug, Default, Deserialize)]
pub struct EventListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub source: Option<String>,
}

impl EventListParams {
    fn page(&self) -> Page {
        let positive = |v: Option<i64>| v.and_then(|v| u32::try_from(v).ok());
        Page::new(
            positive(self.page),
            positive(self.page_size).map(|s| s.min(MAX_PAGE_SIZE)),
        )
    }
}

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
pub struct EventIdsParams {
    pub ids: String,
}

/// Runs `f` against a pooled connection on the blocking pool.
async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection, &str) -> Result<T, ApiError> + Send + 'static,
{
    let pool = state.pool.clone();
    let base_url = state.base_url.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn, &base_url)
    })
    .await?
}

/// GET /api/channels
pub async fn list_channels_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let channels = with_conn(&state, |conn, _| Ok(list_channels(conn)?)).await?;
    Ok(Json(channels))
}

/// GET /api/channels/{channelId}
pub async fn get_channel_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<i64>,
) -> Result<Json<Channel>, ApiError> {
    let channel = with_conn(&state, move |conn, base_url| {
        let mut resolver = Resolver::new(Loaders::new(conn), base_url);
        Ok(resolver.channel(channel_id)?)
    })
    .await?;
    Ok(Json(channel))
}

/// GET /api/channels/{channelId}/events
pub async fn list_channel_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<i64>,
    Query(params): Query<EventListParams>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let views = with_conn(&state, move |conn, base_url| {
        let mut resolver = Resolver::new(Loaders::new(conn), base_url);
        let channel = resolver.channel(channel_id)?;
        let page = params.page();
        let events = match params.source.as_deref().filter(|s| !s.is_empty()) {
            Some(source) => list_source_events(conn, channel.id, source, page)?,
            None => list_channel_events(conn, channel.id, page)?,
        };
        Ok(resolver.views(events)?)
    })
    .await?;
    Ok(Json(views))
}

/// GET /api/events/{eventId}
pub async fn get_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<Json<EventView>, ApiError> {
    let view = with_conn(&state, move |conn, base_url| {
        let mut resolver = Resolver::new(Loaders::new(conn), base_url);
        Ok(resolver.event(event_id)?)
    })
    .await?;
    Ok(Json(view))
}

/// GET /api/events?ids=1,2,3
///
/// Returns one entry per requested ID, in order, with `null` for IDs that
/// do not exist.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventIdsParams>,
) -> Result<Json<Vec<Option<EventView>>>, ApiError> {
    let ids = parse_ids(&params.ids)?;
    let views = with_conn(&state, move |conn, base_url| {
        let mut resolver = Resolver::new(Loaders::new(conn), base_url);
        Ok(resolver.events_by_ids(&ids)?)
    })
    .await?;
    Ok(Json(views))
}

fn parse_ids(raw: &str) -> Result<Vec<i64>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid event id: {s:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use loggo_events::{create_channel, insert_event, CreateChannelParams, NewEvent, NewEventData};
    use loggo_types::EventLevel;
    use rusqlite::Connection;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        loggo_db::run_migrations(&conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, channel_id: i64, minutes_ago: i64, with_data: bool) -> Event {
        insert_event(
            conn,
            &NewEvent {
                channel_id,
                timestamp: Utc::now() - Duration::minutes(minutes_ago),
                source: "svc".to_string(),
                level: EventLevel::Info,
                title: None,
                message: format!("{minutes_ago} minutes ago"),
                data: with_data.then(|| NewEventData {
                    mime_type: "text/plain; charset=utf-8".to_string(),
                    data: b"attached".to_vec(),
                }),
            },
        )
        .unwrap()
    }

    #[test]
    fn views_share_one_channel_batch() {
        let conn = test_db();
        let a = create_channel(&conn, &CreateChannelParams::named("a")).unwrap();
        let b = create_channel(&conn, &CreateChannelParams::named("b")).unwrap();
        let events = vec![
            insert(&conn, a.id, 1, false),
            insert(&conn, b.id, 2, true),
            insert(&conn, a.id, 3, false),
        ];

        let mut resolver = Resolver::new(Loaders::new(&conn), "http://logs");
        let views = resolver.views(events).unwrap();

        assert_eq!(resolver.batches_dispatched(), 1);
        assert_eq!(views[0].channel, a);
        assert_eq!(views[1].channel, b);
        assert_eq!(views[0].data_url, None);
        assert_eq!(
            views[1].data_url.as_deref(),
            Some(format!("http://logs/channel/b/event/{}/data/", views[1].event.id).as_str())
        );
    }

    #[test]
    fn data_url_escapes_the_channel_name() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("my logs")).unwrap();
        let event = insert(&conn, channel.id, 1, true);

        let mut resolver = Resolver::new(Loaders::new(&conn), "http://logs.test");
        let view = resolver.event(event.id).unwrap();
        assert_eq!(
            view.data_url,
            Some(format!("http://logs.test/channel/my%20logs/event/{}/data/", event.id))
        );
    }

    #[test]
    fn data_url_keeps_base_path_and_encodes_reserved_characters() {
        assert_eq!(
            event_data_url("https://example.com/loggo/", "a/b?c#d", 7).as_deref(),
            Some("https://example.com/loggo/channel/a%2Fb%3Fc%23d/event/7/data/")
        );
        assert_eq!(
            event_data_url("https://example.com/loggo", "ops", 7).as_deref(),
            Some("https://example.com/loggo/channel/ops/event/7/data/")
        );
        assert_eq!(event_data_url("not a url", "ops", 7), None);
    }

    #[test]
    fn events_by_ids_keeps_order_and_marks_missing() {
        let conn = test_db();
        let channel = create_channel(&conn, &CreateChannelParams::named("a")).unwrap();
        let first = insert(&conn, channel.id, 1, false);
        let second = insert(&conn, channel.id, 2, false);

        let mut resolver = Resolver::new(Loaders::new(&conn), "http://logs");
        let views = resolver
            .events_by_ids(&[second.id, 999, first.id, second.id])
            .unwrap();

        assert_eq!(views.len(), 4);
        assert_eq!(views[0].as_ref().unwrap().event, second);
        assert!(views[1].is_none());
        assert_eq!(views[2].as_ref().unwrap().event, first);
        // One event batch plus one channel batch.
        assert_eq!(resolver.batches_dispatched(), 2);
    }

    #[test]
    fn page_parameters_are_clamped() {
        let params = EventListParams {
            page: Some(0),
            page_size: Some(-5),
            source: None,
        };
        assert_eq!(params.page(), Page::new(Some(1), Some(20)));

        let params = EventListParams {
            page: Some(3),
            page_size: Some(10_000),
            source: None,
        };
        assert_eq!(params.page(), Page::new(Some(3), Some(MAX_PAGE_SIZE)));
    }

    #[test]
    fn id_lists_parse_leniently() {
        assert_eq!(parse_ids("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_ids("").unwrap().is_empty());
        assert!(matches!(parse_ids("1,x"), Err(ApiError::BadRequest(_))));
    }
}
