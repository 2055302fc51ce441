//! Loggo server library logic.
//!
//! Wires storage, the ingestion pipeline and subscriber publishing into
//! an axum router.

pub mod api;
pub mod api_data;
pub mod api_ingest;
pub mod api_query;
pub mod api_stream;
pub mod config;
pub mod mqtt;
pub mod pipeline;
pub mod publish;
pub mod retention;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use loggo_db::DbPool;
use loggo_events::{ensure_channel, CreateChannelParams, StoreError};
use pipeline::Pipeline;
use publish::{BroadcastPublisher, EventPublisher, FanoutPublisher, PublishedMessage};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum request body size (16 MiB), attachments included.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The ingestion pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Broadcast side of the in-process publisher, for SSE subscribers.
    pub events_tx: broadcast::Sender<PublishedMessage>,
    /// Base URL event data links are built from.
    pub base_url: String,
}

impl AppState {
    /// Builds state with an in-process broadcast publisher of `publish_capacity`.
    pub fn new(pool: DbPool, base_url: impl Into<String>, publish_capacity: usize) -> Self {
        Self::with_publishers(pool, base_url, publish_capacity, Vec::new())
    }

    /// Like [`AppState::new`], also publishing every event to `extra`
    /// (the MQTT broker, for one).
    pub fn with_publishers(
        pool: DbPool,
        base_url: impl Into<String>,
        publish_capacity: usize,
        extra: Vec<Arc<dyn EventPublisher>>,
    ) -> Self {
        let broadcast = BroadcastPublisher::new(publish_capacity);
        let events_tx = broadcast.sender();
        let publisher: Arc<dyn EventPublisher> = if extra.is_empty() {
            Arc::new(broadcast)
        } else {
            let mut targets: Vec<Arc<dyn EventPublisher>> = vec![Arc::new(broadcast)];
            targets.extend(extra);
            Arc::new(FanoutPublisher::new(targets))
        };
        let pipeline = Pipeline::new(pool.clone(), publisher);
        Self {
            pool,
            pipeline: Arc::new(pipeline),
            events_tx,
            base_url: base_url.into(),
        }
    }
}

/// Creates each configured channel that does not exist yet.
///
/// Returns the number of channels created.
pub fn seed_channels(conn: &Connection, channels: &[CreateChannelParams]) -> Result<usize, StoreError> {
    let mut created = 0;
    for params in channels {
        let (channel, is_new) = ensure_channel(conn, params)?;
        if is_new {
            tracing::info!(channel = %channel.name, uuid = %channel.uuid, "created channel");
            created += 1;
        }
    }
    Ok(created)
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route(
            "/channel/{channelName}/event",
            get(api_ingest::ingest_event_handler).post(api_ingest::ingest_event_handler),
        )
        .route(
            "/channel/{channelName}/event/{eventId}/data",
            get(api_data::get_event_data_handler),
        )
        .route(
            "/channel/{channelName}/event/{eventId}/data/",
            get(api_data::get_event_data_handler),
        )
        .route(
            "/channel/{channelName}/stream",
            get(api_stream::channel_stream_handler),
        )
        .route("/api/channels", get(api_query::list_channels_handler))
        .route(
            "/api/channels/{channelId}",
            get(api_query::get_channel_handler),
        )
        .route(
            "/api/channels/{channelId}/events",
            get(api_query::list_channel_events_handler),
        )
        .route("/api/events", get(api_query::get_events_handler))
        .route("/api/events/{eventId}", get(api_query::get_event_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
