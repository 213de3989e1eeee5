// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::TaskCell;

struct Healthy;

#[async_trait]
impl Task for Healthy {
    fn name(&self) -> String {
        "healthy".to_string()
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        while !ctx.should_stop() {
            ctx.respond_to_ping();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

#[test]
fn ping_verdict_only_fails_live_silent_children() {
    assert_eq!(ping_verdict(true, false), None);
    assert_eq!(ping_verdict(true, true), None);
    // a missed ping during shutdown is expected, not fatal
    assert_eq!(ping_verdict(false, true), None);
    assert_eq!(ping_verdict(false, false), Some("suspected task crash or blocking"));
}

#[tokio::test]
async fn watchdog_starts_child_and_keeps_pinging() {
    let hub = SignalHub::new();
    let child = TaskCell::new(Healthy, hub.clone());
    // Healthy has no dedicated ready signal; accept its PostStart
    let watchdog = Watchdog::new(child, hub.clone(), |signal| {
        matches!(signal, Signal::PostStart(name) if name == "healthy")
    })
    .with_intervals(Duration::from_millis(10), Duration::from_millis(200));

    let mut cell = TaskCell::new(watchdog, hub);
    let handle = cell.start().await.unwrap();
    // give it a few ping rounds; a false verdict would kill the process
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(handle.ping(Duration::from_millis(500)).await);
    handle.stop(true, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn watchdog_stop_propagates_to_the_child() {
    let hub = SignalHub::new();
    let mut rx = hub.subscribe();
    let child = TaskCell::new(Healthy, hub.clone());
    let watchdog = Watchdog::new(child, hub.clone(), |signal| {
        matches!(signal, Signal::PostStart(name) if name == "healthy")
    })
    .with_intervals(Duration::from_millis(10), Duration::from_millis(200));

    let mut cell = TaskCell::new(watchdog, hub);
    let handle = cell.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.stop(true, Duration::from_secs(2)).await;

    let mut child_shut_down = false;
    while let Ok(signal) = rx.try_recv() {
        if signal == Signal::PostShutdown("healthy".to_string()) {
            child_shut_down = true;
        }
    }
    assert!(child_shut_down, "child must be stopped when the watchdog stops");
}
