// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::signals::SignalHub;
use crate::task::TaskCell;
use drover_adapters::{FakeRunner, StoreQueueDirectory, WorkerAction};
use drover_broker::{Broker, BrokerRegistry, FakeWorker, FakeWorkerHandle, MemoryTransport};
use drover_core::Config;
use drover_store::InstanceSpec;
use std::path::PathBuf;

struct Harness {
    store: Store,
    state: Arc<BranchState>,
    handle: SupervisorHandle,
    runner: FakeRunner,
    broker: Arc<Broker>,
    cell: TaskCell,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        interval: Duration::from_secs(3600),
        restart_max_rate: Rate { count: 1, per_secs: 60.0 },
        wait_after_broker_revived: Duration::from_secs(0),
        ping_schedule: PingSchedule { start: 0.05, stop: 0.05, step: 0.0, max_probes: 2 },
        retry: RetryPolicy {
            first: Duration::from_millis(10),
            factor: 2.0,
            max_interval: Duration::from_millis(50),
            max_retries: 2,
        },
        poll_timeout: Duration::from_millis(50),
    }
}

async fn harness(options: SupervisorOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("instances");
    let url = MemoryTransport::unique_url();
    let store = Store::in_memory(url.clone());
    let registry =
        Arc::new(BrokerRegistry::new(Arc::new(MemoryTransport), Duration::from_millis(200)));
    let broker = registry.get(&url).unwrap();
    let runner = FakeRunner::new();
    let config = Config { instance_dir: root.clone(), broker_url: url, ..Config::default() };
    let adapter = Arc::new(
        InstanceAdapter::new(
            store.clone(),
            registry,
            Arc::new(runner.clone()),
            Arc::new(StoreQueueDirectory::new(store.clone())),
            &config,
        )
        .with_reply_timeout(Duration::from_millis(150)),
    );
    let state = Arc::new(BranchState::new());
    let signals = SignalHub::new();
    let (supervisor, handle) =
        Supervisor::new(store.clone(), adapter, Arc::clone(&state), signals.clone(), options);
    state.set_supervisor(Arc::new(handle.clone()));
    let mut cell = TaskCell::new(supervisor, signals);
    cell.start().await.unwrap();
    Harness { store, state, handle, runner, broker, cell, root, _dir: dir }
}

fn declare(store: &Store, name: &str, queues: Option<&str>) -> InstanceRecord {
    store
        .instance_add(InstanceSpec {
            name: Some(name.to_string()),
            queues: queues.map(str::to_string),
            max_concurrency: 1,
            min_concurrency: 1,
            ..Default::default()
        })
        .unwrap()
}

fn write_pidfile(harness: &Harness, record: &InstanceRecord, pid: u32) {
    let dir = record.work_dir(&harness.root).unwrap();
    std::fs::write(dir.join("worker.pid"), format!("{pid}\n")).unwrap();
}

async fn live_worker(harness: &Harness, record: &InstanceRecord) -> FakeWorkerHandle {
    write_pidfile(harness, record, std::process::id());
    FakeWorker::spawn(&harness.broker, &record.name).await.unwrap()
}

#[tokio::test]
async fn dead_enabled_instance_is_restarted() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);

    harness.handle.verify(vec![record], false).wait().await;
    assert!(harness.runner.actions().contains(&WorkerAction::Restart));
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn live_enabled_instance_is_left_alone() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);
    let _worker = live_worker(&harness, &record).await;

    harness.handle.verify(vec![record], false).wait().await;
    assert!(harness.runner.actions().is_empty());
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn disabled_instance_with_live_worker_is_stopped() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);
    let _worker = live_worker(&harness, &record).await;
    harness.store.instance_disable("n1").unwrap();

    harness.handle.verify(vec![record], false).wait().await;
    assert_eq!(harness.runner.actions(), vec![WorkerAction::Stop]);
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn removed_instance_with_live_worker_is_stopped() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);
    let _worker = live_worker(&harness, &record).await;
    let removed = harness.store.instance_remove("n1").unwrap();

    harness.handle.verify(vec![removed], false).wait().await;
    assert_eq!(harness.runner.actions(), vec![WorkerAction::Stop]);
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn restart_storm_disables_the_instance() {
    let options = SupervisorOptions {
        restart_max_rate: Rate { count: 3, per_secs: 60.0 },
        ..fast_options()
    };
    let harness = harness(options).await;
    let record = declare(&harness.store, "n1", None);

    for _ in 0..4 {
        harness.handle.verify(vec![record.clone()], true).wait().await;
    }

    let restarts =
        harness.runner.actions().iter().filter(|a| **a == WorkerAction::Restart).count();
    assert_eq!(restarts, 3);
    assert!(!harness.store.instance_get("n1").unwrap().is_enabled);

    // disabled now: further verifies never restart it again
    harness.handle.verify(vec![record], true).wait().await;
    let restarts_after =
        harness.runner.actions().iter().filter(|a| **a == WorkerAction::Restart).count();
    assert_eq!(restarts_after, 3);
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn paused_supervisor_skips_verify_but_still_stops() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);
    harness.handle.pause();

    harness.handle.verify(vec![record.clone()], false).wait().await;
    assert!(harness.runner.actions().is_empty());

    // explicit shutdown is still permitted while paused
    harness.handle.shutdown(vec![record]).wait().await;
    assert_eq!(harness.runner.actions(), vec![WorkerAction::Stop]);
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn queue_drift_is_reconciled_both_ways() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", Some("q1"));
    harness.store.queue_add("q1", None, None, None, None);
    let worker = live_worker(&harness, &record).await;
    worker.add_active_queue("q2");

    harness.handle.verify(vec![record], false).wait().await;

    let active = worker.active_queue_names();
    assert!(active.contains(&"q1".to_string()), "declared queue was added: {active:?}");
    assert!(!active.contains(&"q2".to_string()), "undeclared queue was cancelled: {active:?}");
    assert!(active.contains(&"dq.n1".to_string()), "direct queue is always on: {active:?}");
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn autoscale_drift_is_pushed_to_the_worker() {
    let harness = harness(fast_options()).await;
    let record = declare(&harness.store, "n1", None);
    let worker = live_worker(&harness, &record).await;
    harness.store.instance_set_autoscale("n1", Some(4), Some(2)).unwrap();
    let record = harness.store.instance_get("n1").unwrap();

    harness.handle.verify(vec![record], false).wait().await;
    assert_eq!(worker.autoscaler(), (4, 2));
    harness.cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn automated_restart_waits_out_the_revival_grace_period() {
    let options = SupervisorOptions {
        wait_after_broker_revived: Duration::from_secs(60),
        ..fast_options()
    };
    let harness = harness(options).await;
    let record = declare(&harness.store, "n1", None);
    harness.state.on_broker_revive();

    harness.handle.verify(vec![record.clone()], true).wait().await;
    assert!(
        !harness.runner.actions().contains(&WorkerAction::Restart),
        "restart must wait for the grace period"
    );

    // an explicit (non-ratelimited) restart is not subject to the wait
    harness.handle.restart(vec![record]).wait().await;
    assert!(harness.runner.actions().contains(&WorkerAction::Restart));
    harness.cell.stop(true, Duration::from_secs(1)).await;
}
