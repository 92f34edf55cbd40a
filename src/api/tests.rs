//! 路由测试
//! Router tests

use super::*;
use crate::callback::CallbackTransport;
use crate::config::Config;
use crate::error::Result;
use crate::replication::HttpPeerTransport;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct NoopCallbacks;

#[async_trait]
impl CallbackTransport for NoopCallbacks {
    async fn post(&self, _uri: &str, _sequence_number: u64, _body: Bytes) -> Result<()> {
        Ok(())
    }
}

const LOCAL: &str = "127.0.0.1:7253";

fn app(default_factor: u32) -> Router {
    let mut config = Config::default();
    config.node.advertise = NodeId::from(LOCAL);
    config.replication.default_factor = default_factor;
    config.replication.resync_on_start = false;
    let node = TimerNode::start_with(config, NoopCallbacks, HttpPeerTransport::default());
    router(Arc::new(node))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

fn create_body() -> Value {
    json!({
        "timing": { "interval": 60000, "repeat-for": 300000 },
        "callback": { "http": { "uri": "http://127.0.0.1:9/cb", "opaque": "Hello World!" } }
    })
}

fn replica_body(sequence_number: u64, tombstone: bool) -> Value {
    json!({
        "timing": {
            "interval": 60000,
            "repeat-for": 300000,
            "sequence-number": sequence_number,
            "start-time-delta": -1000
        },
        "callback": { "http": { "uri": "http://127.0.0.1:9/cb", "opaque": "Hello World!" } },
        "reliability": { "replication-factor": 2, "replicas": ["10.0.0.2:7253", LOCAL] },
        "tombstone": tombstone
    })
}

#[tokio::test(start_paused = true)]
async fn test_create_returns_retrievable_location() {
    let app = app(1);
    let (status, headers, body) = send(&app, Method::POST, "/timers", Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED);

    let id = body["id"].as_str().unwrap().to_owned();
    assert_eq!(id.len(), 16);
    let location = headers[header::LOCATION].to_str().unwrap().to_owned();
    assert_eq!(location, format!("/timers/{id}"));

    let (status, _, view) = send(&app, Method::GET, &location, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["id"], json!(id));
    assert_eq!(view["repeat-count"], json!(5));
    assert_eq!(view["remaining"], json!(5));
    assert_eq!(view["sequence-number"], json!(0));
    assert_eq!(view["state"], json!("scheduled"));
    assert_eq!(view["replicas"], json!([LOCAL]));
    assert_eq!(view["callback"]["http"]["opaque"], json!("Hello World!"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_create_bodies_are_rejected() {
    let app = app(1);

    let mut unknown = create_body();
    unknown["timing"]["delay"] = json!(5);
    let mut zero = create_body();
    zero["timing"]["interval"] = json!(0);
    let mut bad_uri = create_body();
    bad_uri["callback"]["http"]["uri"] = json!("ftp://example.com/cb");
    let mut bad_factor = create_body();
    bad_factor["reliability"] = json!({ "replication-factor": 0 });
    let missing_callback = json!({ "timing": { "interval": 1000 } });

    for body in [unknown, zero, bad_uri, bad_factor, missing_callback] {
        let (status, _, problem) = send(&app, Method::POST, "/timers", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(problem["status"], json!(400));
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri("/timers")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_replication_shortfall_is_unavailable() {
    // default factor 2 on a single-node cluster cannot reach its quorum
    let app = app(2);
    let (status, _, problem) = send(&app, Method::POST, "/timers", Some(create_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(problem["status"], json!(503));

    let (_, _, stats) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(stats["scheduler"]["store"]["live"], json!(0));
    assert_eq!(stats["replication"]["creations-failed-total"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_ids() {
    let app = app(1);
    let (status, _, _) = send(&app, Method::GET, "/timers/00000000000000ff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, Method::DELETE, "/timers/00000000000000ff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, Method::GET, "/timers/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_replica_upsert_is_idempotent() {
    let app = app(1);
    let uri = "/timers/0000000000000abc";

    let (status, _, body) = send(&app, Method::PUT, uri, Some(replica_body(3, false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "applied": true }));

    let (_, _, body) = send(&app, Method::PUT, uri, Some(replica_body(3, false))).await;
    assert_eq!(body, json!({ "applied": false }));
    let (_, _, body) = send(&app, Method::PUT, uri, Some(replica_body(2, false))).await;
    assert_eq!(body, json!({ "applied": false }));

    let (status, _, view) = send(&app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["sequence-number"], json!(3));
    assert_eq!(view["remaining"], json!(2));

    let (_, _, listing) = send(&app, Method::GET, &format!("/timers?node-for-replicas={LOCAL}"), None).await;
    let timers = listing["timers"].as_array().unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0]["id"], json!("0000000000000abc"));
    assert_eq!(timers[0]["document"]["timing"]["sequence-number"], json!(3));

    // a tombstone wins and the timer disappears
    let (_, _, body) = send(&app, Method::PUT, uri, Some(replica_body(1, true))).await;
    assert_eq!(body, json!({ "applied": true }));
    let (status, _, _) = send(&app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_replica_document() {
    let app = app(1);
    let mut body = replica_body(1, false);
    body["timing"]["interval"] = json!(0);
    let (status, _, _) = send(&app, Method::PUT, "/timers/0000000000000abc", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, Method::PUT, "/timers/0000000000000abc", Some(json!({ "timing": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_delete_then_get() {
    let app = app(1);
    let (_, headers, _) = send(&app, Method::POST, "/timers", Some(create_body())).await;
    let location = headers[header::LOCATION].to_str().unwrap().to_owned();

    let (status, _, body) = send(&app, Method::DELETE, &location, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _, _) = send(&app, Method::GET, &location, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, Method::DELETE, &location, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_stats_report_every_component() {
    let app = app(1);
    send(&app, Method::POST, "/timers", Some(create_body())).await;

    let (status, _, stats) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["node"], json!(LOCAL));
    assert_eq!(stats["scheduler"]["store"]["live"], json!(1));
    assert_eq!(stats["scheduler"]["store"]["created-total"], json!(1));
    assert_eq!(stats["callbacks"]["in-flight"], json!(0));
    assert!(stats["replication"]["peers"].as_array().unwrap().is_empty());
}
