// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker outage: the supervisor pauses instead of piling up failing
//! work, and resumes once the broker answers again.

use super::prelude::*;
use drover_broker::MemoryTransport;
use std::time::Duration;

#[tokio::test]
async fn outage_pauses_and_revival_resumes() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("100/s")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1"}"#).await;
    assert!(worker.is_alive());
    let actions_before = branch.runner.actions().len();

    MemoryTransport::set_down(&url, true);

    // a verify during the outage pauses the supervisor
    let record = branch.store.instance_get("n1").expect("record");
    branch.state.supervisor().verify(vec![record.clone()], true).wait().await;
    assert!(branch.state.supervisor().is_paused(), "supervisor must pause on broker loss");

    // while paused, verifies are no-ops: nothing reaches the worker
    worker.add_active_queue("drift");
    branch.state.supervisor().verify(vec![record.clone()], true).wait().await;
    assert_eq!(branch.runner.actions().len(), actions_before);
    assert!(worker.active_queue_names().contains(&"drift".to_string()));

    // explicit shutdown is still permitted while paused
    branch.state.supervisor().shutdown(vec![record.clone()]).wait().await;
    assert!(branch.runner.actions().len() > actions_before);

    MemoryTransport::set_down(&url, false);

    // the periodic tick probes the broker and clears the pause
    eventually("supervisor to resume", Duration::from_secs(10), || async {
        !branch.state.supervisor().is_paused()
    })
    .await;
    assert!(branch.state.time_since_broker_revived().is_some());

    // and the next verify completes normally, reconciling the drift
    let record = branch.store.instance_get("n1").expect("record");
    branch.state.supervisor().verify(vec![record], true).wait().await;
    assert!(!worker.active_queue_names().contains(&"drift".to_string()));

    branch.stop().await;
}
