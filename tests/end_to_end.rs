//! Single-node end-to-end tests over real HTTP on loopback.

pub mod common;

use common::harness::{CallbackSink, create_body, spawn_cluster};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn test_timer_fires_every_interval_until_exhausted() {
    let mut sink = CallbackSink::start().await;
    let nodes = spawn_cluster(1, |_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(nodes[0].url("/timers"))
        .json(&create_body(&sink.uri("five"), 1000, 5000, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()["location"].to_str().unwrap().to_owned();
    let created: Value = response.json().await.unwrap();
    assert_eq!(location, format!("/timers/{}", created["id"].as_str().unwrap()));

    let view: Value = client
        .get(nodes[0].url(&location))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["repeat-count"], json!(5));
    assert_eq!(view["state"], json!("scheduled"));

    let mut previous = None;
    for expected in 1..=5 {
        let received = sink.next(Duration::from_secs(3)).await;
        assert_eq!(received.name, "five");
        assert_eq!(received.sequence_number, expected);
        assert_eq!(&received.body[..], b"Hello World!");
        if let Some(previous) = previous {
            assert!(received.at - previous >= Duration::from_millis(900));
        }
        previous = Some(received.at);
    }

    assert!(sink.drain(Duration::from_millis(1500)).await.is_empty());
    let status = client.get(nodes[0].url(&location)).send().await.unwrap().status();
    assert_eq!(status, StatusCode::NOT_FOUND);

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_repeat_for_shorter_than_interval_fires_once() {
    let mut sink = CallbackSink::start().await;
    let nodes = spawn_cluster(1, |_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(nodes[0].url("/timers"))
        .json(&create_body(&sink.uri("once"), 300, 100, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let received = sink.next(Duration::from_secs(2)).await;
    assert_eq!(received.sequence_number, 1);
    assert!(sink.drain(Duration::from_secs(1)).await.is_empty());

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_deleted_timer_stops_firing() {
    let mut sink = CallbackSink::start().await;
    let nodes = spawn_cluster(1, |_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(nodes[0].url("/timers"))
        .json(&create_body(&sink.uri("deleted"), 500, 30_000, 1))
        .send()
        .await
        .unwrap();
    let location = response.headers()["location"].to_str().unwrap().to_owned();

    assert_eq!(sink.next(Duration::from_secs(2)).await.sequence_number, 1);
    let status = client.delete(nodes[0].url(&location)).send().await.unwrap().status();
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(sink.drain(Duration::from_secs(1)).await.is_empty());
    let status = client.get(nodes[0].url(&location)).send().await.unwrap().status();
    assert_eq!(status, StatusCode::NOT_FOUND);

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_failing_endpoint_is_audited() {
    let sink = CallbackSink::start().await;
    let nodes = spawn_cluster(1, |config| config.callback.retry.max_attempts = 2).await;
    let client = reqwest::Client::new();

    let response = client
        .post(nodes[0].url("/timers"))
        .json(&create_body(&format!("http://{}/fail", sink.addr), 1000, 30_000, 1))
        .send()
        .await
        .unwrap();
    let location = response.headers()["location"].to_str().unwrap().to_owned();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let view: Value = client
        .get(nodes[0].url(&location))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first = &view["audit"][0];
    assert_eq!(first["kind"], json!("callback-failed"));
    assert_eq!(first["sequence-number"], json!(1));
    assert_eq!(first["attempts"], json!(2));

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_replayed_put_is_a_no_op() {
    let nodes = spawn_cluster(1, |_| {}).await;
    let client = reqwest::Client::new();
    let local = nodes[0].addr.to_string();
    let document = json!({
        "timing": { "interval": 60000, "repeat-for": 60000, "sequence-number": 0, "start-time-delta": 0 },
        "callback": { "http": { "uri": "http://127.0.0.1:9/cb", "opaque": "" } },
        "reliability": { "replication-factor": 2, "replicas": ["127.0.0.1:1", local] }
    });
    let url = nodes[0].url("/timers/00000000000000aa");

    let first: Value = client.put(&url).json(&document).send().await.unwrap().json().await.unwrap();
    let second: Value = client.put(&url).json(&document).send().await.unwrap().json().await.unwrap();
    assert_eq!(first, json!({ "applied": true }));
    assert_eq!(second, json!({ "applied": false }));

    let stats: Value = client.get(nodes[0].url("/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["scheduler"]["store"]["live"], json!(1));
    assert_eq!(stats["scheduler"]["store"]["replicas-ignored-total"], json!(1));

    for node in nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_bad_requests() {
    let nodes = spawn_cluster(1, |_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(nodes[0].url("/timers"))
        .json(&json!({ "timing": { "interval": 1000 }, "callback": { "http": { "uri": "x", "opaque": "" } } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let problem: Value = response.json().await.unwrap();
    assert_eq!(problem["status"], json!(400));

    let status = client
        .get(nodes[0].url("/timers/ffffffffffffffff"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::NOT_FOUND);

    for node in nodes {
        node.stop().await;
    }
}
