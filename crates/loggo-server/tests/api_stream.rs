use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::StreamExt;
use loggo_db::{create_pool, run_migrations, DbRuntimeSettings};
use loggo_events::{create_channel, CreateChannelParams};
use loggo_server::{app, AppState};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn setup() -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("loggo.db");
    let pool = create_pool(db_path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        create_channel(&conn, &CreateChannelParams::named("app-logs")).unwrap();
        create_channel(&conn, &CreateChannelParams::named("other")).unwrap();
    }
    (AppState::new(pool, "http://logs.test", 16), dir)
}

#[tokio::test]
async fn stream_delivers_only_the_channels_events() {
    let (state, _dir) = setup();

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/channel/app-logs/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // The subscription exists once the handler has returned.
    state
        .pipeline
        .ingest_mqtt("channel/other?source=s&level=info&message=elsewhere", Vec::new())
        .await
        .unwrap();
    state
        .pipeline
        .ingest_mqtt("channel/app-logs?source=s&level=info&message=here", Vec::new())
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .expect("timed out waiting for SSE frame")
        .expect("stream ended")
        .expect("body error");
    let frame = String::from_utf8(chunk.to_vec()).unwrap();

    assert!(frame.contains("event: event"), "unexpected frame: {frame}");
    assert!(frame.contains(r#""message":"here""#), "unexpected frame: {frame}");
    assert!(!frame.contains("elsewhere"));
}

#[tokio::test]
async fn stream_of_unknown_channel_is_not_found() {
    let (state, _dir) = setup();
    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/channel/nope/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
