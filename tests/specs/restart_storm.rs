// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart storms: a crash-looping instance gets disabled instead of
//! restarted forever.

use super::prelude::*;
use drover_adapters::WorkerAction;
use drover_broker::MemoryTransport;

fn restarts(branch: &TestBranch) -> usize {
    branch.runner.actions().iter().filter(|a| matches!(a, WorkerAction::Restart)).count()
}

#[tokio::test]
async fn fourth_crash_in_the_window_disables_the_instance() {
    let url = MemoryTransport::unique_url();
    let mut branch = TestBranch::start(&url, fast_supervisor("3/m")).await;
    let worker = branch.spawn_worker("n1").await;
    http(&branch.router, "POST", "/a1/instances", r#"{"name":"n1"}"#).await;
    assert!(worker.is_alive());
    let baseline = restarts(&branch);

    for round in 1..=4 {
        worker.kill();
        let record = branch.store.instance_get("n1").expect("record");
        branch.state.supervisor().verify(vec![record], true).wait().await;
        if round <= 3 {
            assert!(worker.is_alive(), "restart {round} should revive the worker");
        }
    }

    // three automated restarts were allowed, the fourth tripped the
    // limiter and disabled the instance
    assert_eq!(restarts(&branch) - baseline, 3);
    assert!(!branch.store.instance_get("n1").expect("record").is_enabled);

    // further verifies never restart a disabled instance
    let record = branch.store.instance_get("n1").expect("record");
    branch.state.supervisor().verify(vec![record], true).wait().await;
    assert_eq!(restarts(&branch) - baseline, 3);

    // until an operator re-enables it
    branch.local.enable("n1", false).await.expect("enable");
    assert!(worker.is_alive(), "re-enabling brings the worker back");

    branch.stop().await;
}
