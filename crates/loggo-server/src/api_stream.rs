//! SSE stream of a channel's published events.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use futures_util::Stream;
use loggo_events::channel_by_name;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Handler for `GET /channel/{channelName}/stream`.
///
/// Streams the canonical JSON of every event published on the channel's
/// topic from the moment of subscription. Publishing is skipped for
/// channels with MQTT disabled, so their streams stay silent.
pub async fn channel_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let channel = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        move || {
            let conn = pool.get()?;
            channel_by_name(&conn, &channel_name).map_err(ApiError::from)
        }
    })
    .await??;

    let topic = channel.publish_topic();
    let rx = state.events_tx.subscribe();
    tracing::debug!(channel = %channel.name, topic = %topic, "subscriber attached");

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(message) if message.topic == topic => {
            let data = String::from_utf8_lossy(&message.payload).into_owned();
            Some(Ok(Event::default().event("event").data(data)))
        }
        Ok(_) => None,
        Err(lagged) => {
            tracing::warn!(
                topic = %topic,
                error = %lagged,
                "event stream lagged; events were dropped for this subscriber"
            );
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
