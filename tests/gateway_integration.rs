//! End-to-end scenarios (§8) against a full `axum::Router` wired to a
//! `MockBrokerTransport`, following the teacher's mock-client integration
//! test style.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway::demux::Demultiplexer;
use gateway::dispatcher::Dispatcher;
use gateway::http::{build_router, AppState};
use gateway::resolver::Resolver;
use gateway::shared::Shared;
use gateway::transport::MockBrokerTransport;
use gateway::types::RequestId;
use serde_json::{json, Value};
use tower::ServiceExt;

struct Harness {
    app: axum::Router<()>,
    transport: Arc<MockBrokerTransport>,
    demux: Arc<Demultiplexer>,
    shared: Arc<Shared>,
}

fn harness(max_depth: usize) -> Harness {
    let shared = Arc::new(Shared::new());
    let transport = Arc::new(MockBrokerTransport::new());
    let dispatcher = Arc::new(Dispatcher::new(shared.clone(), transport.clone()));
    let resolver = Arc::new(Resolver::new(shared.clone(), transport.clone(), max_depth));
    let demux = Arc::new(Demultiplexer::new(shared.clone(), resolver.clone()));

    let app = build_router(AppState {
        shared: shared.clone(),
        dispatcher,
        resolver,
    });

    Harness {
        app,
        transport,
        demux,
        shared,
    }
}

/// Waits for exactly one published frame, parses its `msg_id`, and returns
/// it so the test can inject a matching reply.
async fn wait_for_published_msg_id(transport: &MockBrokerTransport) -> u64 {
    for _ in 0..50 {
        let published = transport.published();
        if let Some(frame) = published.first() {
            let value: Value = serde_json::from_slice(&frame.bytes).unwrap();
            return value["msg_id"].as_u64().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no frame was published within the test's patience");
}

#[tokio::test]
async fn query_with_empty_filter_round_trips_to_200() {
    let Harness { app, transport, demux, .. } = harness(2);

    let request_future = tokio::spawn(app.oneshot(
        Request::builder()
            .uri("/equipment")
            .body(Body::empty())
            .unwrap(),
    ));

    let msg_id = wait_for_published_msg_id(&transport).await;
    demux.handle_frame(
        serde_json::to_vec(&json!({"msg_id": msg_id, "status": 0, "result": []})).unwrap(),
    );

    let response = request_future.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_by_id_resolves_a_nested_entity() {
    let Harness { app, transport, demux, .. } = harness(2);

    let request_future = tokio::spawn(app.oneshot(
        Request::builder()
            .uri("/equipment/1")
            .body(Body::empty())
            .unwrap(),
    ));

    let outer_id = wait_for_published_msg_id(&transport).await;
    demux.handle_frame(
        serde_json::to_vec(&json!({
            "msg_id": outer_id,
            "status": 0,
            "result": {"id": 1, "name": "drill", "venue_id": 9}
        }))
        .unwrap(),
    );

    // The resolver now issues a sub-fetch for venue 9; wait for it.
    let sub_id = loop {
        let published = transport.published();
        if published.len() >= 2 {
            let value: Value = serde_json::from_slice(&published[1].bytes).unwrap();
            break value["msg_id"].as_u64().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    demux.handle_frame(
        serde_json::to_vec(&json!({
            "msg_id": sub_id,
            "status": 0,
            "result": {"id": 9, "name": "Main Hall"}
        }))
        .unwrap(),
    );

    let response = request_future.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"]["venue_id"]["name"], "Main Hall");
}

#[tokio::test]
async fn sub_fetch_failure_yields_outer_500_and_releases_the_intercepted_id() {
    let Harness { app, transport, demux, shared } = harness(2);

    let request_future = tokio::spawn(app.oneshot(
        Request::builder()
            .uri("/equipment/1")
            .body(Body::empty())
            .unwrap(),
    ));

    let outer_id = wait_for_published_msg_id(&transport).await;
    demux.handle_frame(
        serde_json::to_vec(&json!({
            "msg_id": outer_id,
            "status": 0,
            "result": {"id": 1, "name": "drill", "venue_id": 9}
        }))
        .unwrap(),
    );

    // The resolver now issues a sub-fetch for venue 9; wait for it.
    let sub_id = loop {
        let published = transport.published();
        if published.len() >= 2 {
            let value: Value = serde_json::from_slice(&published[1].bytes).unwrap();
            break value["msg_id"].as_u64().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(shared.is_intercepted(RequestId(sub_id)));

    // The venue service reports failure for the sub-fetch.
    demux.handle_frame(
        serde_json::to_vec(&json!({
            "msg_id": sub_id,
            "status": 500,
            "result": {"error": "venue service unavailable"}
        }))
        .unwrap(),
    );

    let response = request_future.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!shared.is_intercepted(RequestId(sub_id)));
}

#[tokio::test]
async fn missing_required_field_yields_400_without_publishing() {
    let Harness { app, transport, .. } = harness(2);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/equipment")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "drill"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn unmatched_reply_is_dropped_without_panicking() {
    let Harness { demux, .. } = harness(2);
    demux.handle_frame(serde_json::to_vec(&json!({"msg_id": 999999, "status": 0})).unwrap());
}

#[tokio::test]
async fn healthz_reports_ok() {
    let Harness { app, .. } = harness(2);
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
