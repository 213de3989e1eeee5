// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook enqueue and task polling: the HTTP layer publishes the task,
//! a worker runs it elsewhere and posts the result.

use super::prelude::*;
use axum::http::StatusCode;
use drover_broker::MemoryTransport;
use drover_wire::{TaskResult, TaskState, WebhookTask};
use serde_json::json;
use std::time::Duration;

/// A stand-in task worker: consumes the queue and reports success for
/// every webhook task it sees.
async fn run_task_worker(branch: &TestBranch, queue: &str) {
    let conn = branch.broker.connection().await.expect("conn");
    conn.declare_queue(queue, false).await.expect("declare");
    let mut sub = conn.consume(queue).await.expect("consume");
    let producer = conn.producer().await.expect("producer");
    tokio::spawn(async move {
        while let Some(delivery) = sub.recv().await {
            let Ok(task) = serde_json::from_slice::<WebhookTask>(&delivery.payload) else {
                continue;
            };
            let result = TaskResult {
                id: task.id.clone(),
                state: TaskState::Success,
                result: json!({"status_code": 200, "url": task.url}),
            };
            let queue = format!("drover.result.{}", task.id);
            let Ok(payload) = serde_json::to_vec(&result) else { continue };
            let _ = producer.publish("", &queue, &payload).await;
        }
    });
}

#[tokio::test]
async fn webhook_round_trips_to_success() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    http(&branch.router, "POST", "/a1", "").await;
    http(
        &branch.router,
        "POST",
        "/a1/queues",
        r#"{"name":"q1","exchange":"q1","exchange_type":"direct","routing_key":"q1"}"#,
    )
    .await;
    run_task_worker(&branch, "q1").await;

    let (status, receipt) =
        http(&branch.router, "POST", "/a1/queue/q1/http://example.test/hook?x=1", "y=2").await;
    assert_eq!(status, StatusCode::ACCEPTED, "webhook enqueue failed: {receipt}");
    assert_eq!(receipt["url"], json!("http://example.test/hook"));
    assert_eq!(receipt["queue"], json!("q1"));
    assert_eq!(receipt["method"], json!("POST"));
    assert_eq!(receipt["params"], json!({"x": "1"}));
    assert_eq!(receipt["data"], json!({"y": "2"}));
    assert_eq!(receipt["broker"], json!(branch.broker_url));
    let uuid = receipt["uuid"].as_str().expect("uuid").to_string();

    eventually("task to succeed", Duration::from_secs(10), || {
        let router = branch.router.clone();
        let path = format!("/a1/query/{uuid}/state");
        async move {
            let (_, body) = http(&router, "GET", &path, "").await;
            body == json!({"state": "SUCCESS"})
        }
    })
    .await;

    let (status, body) =
        http(&branch.router, "GET", &format!("/a1/query/{uuid}/result"), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["status_code"], json!(200));

    let (status, body) =
        http(&branch.router, "GET", &format!("/a1/query/{uuid}/wait"), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["url"], json!("http://example.test/hook"));

    branch.stop().await;
}

#[tokio::test]
async fn webhook_to_an_unknown_queue_is_a_404() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    http(&branch.router, "POST", "/a1", "").await;
    let (status, _) =
        http(&branch.router, "POST", "/a1/queue/ghost/http://example.test/hook", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    branch.stop().await;
}
