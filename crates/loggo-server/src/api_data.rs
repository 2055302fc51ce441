//! Retrieval of stored event attachments.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::header,
    response::{IntoResponse, Response},
};
use loggo_events::get_event_data;
use std::sync::Arc;

/// Handler for `GET /channel/{channelName}/event/{eventId}/data`.
///
/// Responds with the attachment bytes under their sniffed MIME type, or
/// 404 when the channel, the event, or its attachment does not exist.
pub async fn get_event_data_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((channel_name, event_id)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    let data = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        move || {
            let conn = pool.get()?;
            get_event_data(&conn, &channel_name, event_id).map_err(ApiError::from)
        }
    })
    .await??;

    Ok(([(header::CONTENT_TYPE, data.mime_type)], data.data).into_response())
}
