// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer membership: declare a queue, attach and detach an instance.

use super::prelude::*;
use axum::http::StatusCode;
use drover_broker::MemoryTransport;
use serde_json::json;

#[tokio::test]
async fn add_and_remove_consumer_end_to_end() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1"}"#).await;
    assert!(worker.is_alive());

    let (status, queue) = http(
        &branch.router,
        "POST",
        "/a1/queues",
        r#"{"name":"q1","exchange":"q1","exchange_type":"direct","routing_key":"q1"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "queue create failed: {queue}");

    let (status, body) = http(&branch.router, "PUT", "/a1/instances/n1/queues/q1", "").await;
    assert_eq!(status, StatusCode::CREATED, "consumer add failed: {body}");
    assert!(branch.store.instance_get("n1").expect("record").queues.contains("q1"));
    assert!(worker.active_queue_names().contains(&"q1".to_string()));

    let (status, consuming) = http(&branch.router, "GET", "/a1/instances/n1/queues", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(consuming.get("q1").is_some(), "GET queues must list q1: {consuming}");
    // the direct queue is always on
    assert!(consuming.get("dq.n1").is_some());

    let (status, _) = http(&branch.router, "DELETE", "/a1/instances/n1/queues/q1", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!branch.store.instance_get("n1").expect("record").queues.contains("q1"));
    assert!(!worker.active_queue_names().contains(&"q1".to_string()));

    let (_, consuming) = http(&branch.router, "GET", "/a1/instances/n1/queues", "").await;
    assert!(consuming.get("q1").is_none(), "q1 must be gone: {consuming}");

    branch.stop().await;
}

#[tokio::test]
async fn deleting_a_queue_detaches_every_instance() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1","queues":"q1"}"#).await;
    assert!(worker.is_alive());
    http(&branch.router, "POST", "/a1/queues", r#"{"name":"q1"}"#).await;

    let (status, _) = http(&branch.router, "DELETE", "/a1/queues/q1", "").await;
    assert_eq!(status, StatusCode::OK);

    eventually("queue to leave the instance record", std::time::Duration::from_secs(5), || async {
        !branch.store.instance_get("n1").expect("record").queues.contains("q1")
    })
    .await;
    assert!(branch.store.queue_get("q1").is_none());

    branch.stop().await;
}

#[tokio::test]
async fn unknown_queue_names_are_reconciled_away() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    // "ghost" resolves nowhere: reconciliation must drop it, warn, and
    // keep going
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1","queues":"ghost"}"#).await;
    assert!(worker.is_alive());

    let record = branch.store.instance_get("n1").expect("record");
    assert!(
        !record.queues.contains("ghost"),
        "unresolvable queue must be removed from the set: {:?}",
        record.queues
    );
    assert_eq!(json!(record.is_enabled), json!(true));

    branch.stop().await;
}
