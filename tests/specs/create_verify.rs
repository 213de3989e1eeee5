// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Create → verify → observe: a freshly declared instance is brought up
//! and its autoscaler converges on the declared bounds.

use super::prelude::*;
use axum::http::StatusCode;
use drover_broker::MemoryTransport;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn created_instance_comes_up_with_declared_autoscale() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;

    let (status, body) = http(
        &branch.router,
        "POST",
        "/a1/instances",
        r#"{"name":"n1","max":2,"min":1}"#,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["name"], json!("n1"));

    // the create blocked on the verify: the worker was restarted and
    // its autoscaler reconciled to the declared pair
    assert!(worker.is_alive(), "verify must bring the worker up");
    eventually("autoscaler to converge", Duration::from_secs(30), || async {
        worker.autoscaler() == (2, 1)
    })
    .await;

    let (status, stats) = http(&branch.router, "GET", "/a1/instances/n1/stats", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["autoscaler"], json!({"max": 2, "min": 1}));

    // the instance shows up in listings and resolves by name
    let (_, names) = http(&branch.router, "GET", "/a1/instances", "").await;
    assert_eq!(names, json!(["n1"]));
    let (status, descriptor) = http(&branch.router, "GET", "/a1/instances/n1", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(descriptor["is_enabled"], json!(true));

    branch.stop().await;
}

#[tokio::test]
async fn autoscale_endpoint_reads_and_writes_the_pair() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1"}"#).await;
    assert!(worker.is_alive());

    let (status, body) =
        http(&branch.router, "POST", "/a1/instances/n1/autoscale", r#"{"max":4,"min":2}"#).await;
    assert_eq!(status, StatusCode::OK, "autoscale failed: {body}");
    assert_eq!(body, json!({"max": 4, "min": 2}));
    assert_eq!(worker.autoscaler(), (4, 2));

    let (_, read_back) = http(&branch.router, "GET", "/a1/instances/n1/autoscale", "").await;
    assert_eq!(read_back, json!({"max": 4, "min": 2}));

    branch.stop().await;
}

#[tokio::test]
async fn disabled_instance_is_stopped_and_never_restarted() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1"}"#).await;
    assert!(worker.is_alive());

    // instance names are unique: a duplicate create is rejected
    let (status, _) = http(&branch.router, "POST", "/a1/instances/n1", r#"{}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    branch.local.disable("n1", false).await.expect("disable");
    let record = branch.store.instance_get("n1").expect("record");
    assert!(!record.is_enabled);

    // disabling verified synchronously: the worker was told to stop
    let stops = branch
        .runner
        .actions()
        .iter()
        .filter(|a| matches!(a, drover_adapters::WorkerAction::Stop))
        .count();
    assert!(stops >= 1, "expected a stop, got {:?}", branch.runner.actions());

    branch.stop().await;
}
