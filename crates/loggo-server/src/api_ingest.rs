//! HTTP event ingestion.

use crate::api::ApiError;
use crate::pipeline::ChannelTarget;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Path, RawQuery},
    http::{header, HeaderMap},
    Json,
};
use loggo_events::Event;
use loggo_intake::{FieldSet, FIELD_NAMES};
use std::sync::Arc;

const HEADER_PREFIX: &str = "loggo-";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Handler for `GET|POST /channel/{channelName}/event`.
///
/// Event fields are bound from, in order of precedence, `Loggo-<Field>`
/// or bare `<Field>` headers, query parameters, and a form-urlencoded
/// body. When any field is bound that way a remaining body is the event's
/// attachment; otherwise the body itself is decoded as the event.
pub async fn ingest_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Event>, ApiError> {
    let (fields, attachment) = bind_fields(&headers, query.as_deref(), body);

    let event = state
        .pipeline
        .ingest(ChannelTarget::Name(channel_name), fields, attachment)
        .await?;

    Ok(Json(event))
}

/// Collects event fields from request metadata.
///
/// Returns the bound fields, if any, and the bytes left for the attachment
/// or the decoder chain.
fn bind_fields(headers: &HeaderMap, query: Option<&str>, body: Bytes) -> (Option<FieldSet>, Vec<u8>) {
    let mut fields = FieldSet::new();

    for name in FIELD_NAMES {
        for header_name in [format!("{HEADER_PREFIX}{name}"), name.to_string()] {
            if let Some(value) = headers.get(&header_name).and_then(|v| v.to_str().ok()) {
                fields.insert(name, value);
            }
        }
    }

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            fields.insert(&key, value);
        }
    }

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));
    if is_form {
        let mut form_fields = 0;
        for (key, value) in url::form_urlencoded::parse(&body) {
            if FIELD_NAMES.contains(&key.to_ascii_lowercase().as_str()) {
                form_fields += 1;
            }
            fields.insert(&key, value);
        }
        if form_fields > 0 {
            return (Some(fields), Vec::new());
        }
    }

    let fields = if fields.is_empty() { None } else { Some(fields) };
    (fields, body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefixed_headers_win_over_bare_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert("loggo-source", HeaderValue::from_static("prefixed"));
        headers.insert("source", HeaderValue::from_static("bare"));
        headers.insert("level", HeaderValue::from_static("info"));

        let (fields, body) = bind_fields(
            &headers,
            Some("source=query&message=from%20query"),
            Bytes::from_static(b"payload"),
        );
        let fields = fields.unwrap();
        assert_eq!(fields.get("source"), Some("prefixed"));
        assert_eq!(fields.get("level"), Some("info"));
        assert_eq!(fields.get("message"), Some("from query"));
        assert_eq!(body, b"payload");
    }

    #[test]
    fn form_body_is_consumed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        let (fields, body) = bind_fields(
            &headers,
            None,
            Bytes::from_static(b"source=web&level=debug&message=clicked"),
        );
        assert_eq!(fields.unwrap().get("source"), Some("web"));
        assert!(body.is_empty());
    }

    #[test]
    fn plain_body_without_fields_is_left_for_decoding() {
        let (fields, body) = bind_fields(
            &HeaderMap::new(),
            Some("unrelated=1"),
            Bytes::from_static(br#"{"source":"s"}"#),
        );
        assert!(fields.is_none());
        assert_eq!(body, br#"{"source":"s"}"#);
    }
}
