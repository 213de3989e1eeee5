// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-branch name resolution: two branches share a broker; either
//! one can answer for names the other owns.

use super::prelude::*;
use axum::http::StatusCode;
use drover_broker::MemoryTransport;
use drover_store::InstanceSpec;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn instance_owned_by_one_branch_resolves_from_the_other() {
    let url = MemoryTransport::unique_url();
    let mut b1 = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let mut b2 = TestBranch::start(&url, fast_supervisor("100/s")).await;

    // create n2 on b1 (directly through its local manager, so ownership
    // is deterministic)
    let worker = b1.spawn_worker("n2").await;
    b1.local
        .add(
            InstanceSpec {
                name: Some("n2".to_string()),
                max_concurrency: 2,
                min_concurrency: 1,
                ..Default::default()
            },
            false,
        )
        .await
        .expect("add");
    assert!(worker.is_alive());
    assert!(b2.store.instance_get("n2").is_none(), "b2 does not own n2");

    // a client pointed at b2 sees it once presence propagates
    eventually("b2 to resolve n2", Duration::from_secs(10), || async {
        let (status, _) = http(&b2.router, "GET", "/a1/instances/n2", "").await;
        status == StatusCode::OK
    })
    .await;
    let (_, descriptor) = http(&b2.router, "GET", "/a1/instances/n2", "").await;
    assert_eq!(descriptor["name"], json!("n2"));
    assert_eq!(descriptor["max_concurrency"], json!(2));

    // fleet-wide listings agree from both ends
    let (_, from_b1) = http(&b1.router, "GET", "/a1/instances", "").await;
    let (_, from_b2) = http(&b2.router, "GET", "/a1/instances", "").await;
    assert_eq!(from_b1, json!(["n2"]));
    assert_eq!(from_b2, json!(["n2"]));

    // both branches enumerate each other
    eventually("branches to see each other", Duration::from_secs(10), || async {
        let (_, ids) = http(&b2.router, "GET", "/branches", "").await;
        ids.as_array().is_some_and(|ids| ids.len() == 2)
    })
    .await;

    // a name nobody advertises is a 404 everywhere
    let (status, _) = http(&b2.router, "GET", "/a1/instances/ghost", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    b2.stop().await;
    b1.stop().await;
}

#[tokio::test]
async fn remote_branch_control_works_across_the_fleet() {
    let url = MemoryTransport::unique_url();
    let mut b1 = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let mut b2 = TestBranch::start(&url, fast_supervisor("100/s")).await;

    // every branch reports its metrics block
    let metrics = b1.clients.apps.metrics().await.expect("metrics");
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|m| m["load_average"].is_array()));

    // without an HTTP server the url enumeration is all nulls
    let urls = b1.clients.branches.urls().await.expect("urls");
    assert_eq!(urls.len(), 2);

    // presence must know b2 before we can address it
    eventually("b1 to route to b2", Duration::from_secs(10), || async {
        b1.clients.branches.get(&b2.branch_id).await.is_ok()
    })
    .await;
    let about = b1.clients.branches.get(&b2.branch_id).await.expect("about");
    assert_eq!(about["id"], json!(b2.branch_id));

    // a remote shutdown request takes the target branch down
    b1.clients.branches.shutdown(&b2.branch_id).await.expect("shutdown cast");
    eventually("b2 to exit", Duration::from_secs(10), || async { !b2.is_running() }).await;
    assert!(b1.is_running(), "only the addressed branch exits");

    b2.stop().await;
    b1.stop().await;
}

#[tokio::test]
async fn apps_replicate_through_scatter() {
    let url = MemoryTransport::unique_url();
    let mut b1 = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let mut b2 = TestBranch::start(&url, fast_supervisor("100/s")).await;

    let (status, _) = http(&b1.router, "POST", "/a2", r#"{"arguments":"-A proj"}"#).await;
    assert_eq!(status, StatusCode::CREATED);

    // the scatter add propagates; b2 answers from its own store
    eventually("b2 to know a2", Duration::from_secs(10), || async {
        b2.store.app_get("a2").is_some()
    })
    .await;
    let (status, body) = http(&b2.router, "GET", "/a2", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("a2"));
    assert_eq!(body["arguments"], json!("-A proj"));

    b2.stop().await;
    b1.stop().await;
}
