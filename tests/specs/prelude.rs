// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness: branches over the in-memory broker.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use drover_adapters::{FakeRunner, WorkerAction};
use drover_branch::branch::{Branch, BranchOptions};
use drover_branch::httpd::router;
use drover_branch::state::BranchState;
use drover_branch::supervisor::{Completion, SupervisorOptions};
use drover_branch::{FleetClients, LocalInstanceManager};
use drover_broker::{Broker, FakeWorker, FakeWorkerHandle, MemoryTransport};
use drover_core::{Config, PingSchedule, Rate, RetryPolicy};
use drover_store::Store;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

/// Supervisor tuning for specs: everything fast, generous restart rate
/// unless a scenario overrides it.
pub fn fast_supervisor(restart_max_rate: &str) -> SupervisorOptions {
    SupervisorOptions {
        interval: Duration::from_millis(200),
        restart_max_rate: restart_max_rate.parse().expect("valid rate"),
        wait_after_broker_revived: Duration::from_millis(0),
        ping_schedule: PingSchedule { start: 0.05, stop: 0.05, step: 0.0, max_probes: 2 },
        retry: RetryPolicy {
            first: Duration::from_millis(10),
            factor: 2.0,
            max_interval: Duration::from_millis(40),
            max_retries: 2,
        },
        poll_timeout: Duration::from_millis(50),
    }
}

pub struct TestBranch {
    pub branch_id: String,
    pub router: Router,
    pub store: Store,
    pub state: Arc<BranchState>,
    pub local: Arc<LocalInstanceManager>,
    pub clients: FleetClients,
    pub broker: Broker,
    pub runner: FakeRunner,
    pub broker_url: String,
    pub instance_root: PathBuf,
    workers: Arc<Mutex<HashMap<String, Arc<FakeWorkerHandle>>>>,
    exit: CancellationToken,
    run: Option<JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestBranch {
    /// Start a branch on `broker_url` and wait until it is ready.
    pub async fn start(broker_url: &str, supervisor: SupervisorOptions) -> TestBranch {
        let dir = tempfile::tempdir().expect("tempdir");
        let instance_root = dir.path().join("instances");
        let config = Config {
            db_name: dir.path().join("branch.db").display().to_string(),
            broker_url: broker_url.to_string(),
            instance_dir: instance_root.clone(),
            presence_interval: Duration::from_millis(100),
            ..Config::default()
        };
        let runner = FakeRunner::new();

        // restarting (or starting) a worker revives its fake twin
        let workers: Arc<Mutex<HashMap<String, Arc<FakeWorkerHandle>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let hook_workers = Arc::clone(&workers);
        runner.set_hook(move |action, argv| {
            if matches!(action, WorkerAction::Start | WorkerAction::Restart) {
                if let Some(name) = argv.get(4) {
                    if let Some(worker) = hook_workers.lock().get(name) {
                        worker.revive();
                    }
                }
            }
        });

        let options = BranchOptions {
            without_httpd: true,
            numc: 2,
            runner: Some(Arc::new(runner.clone())),
            supervisor: Some(supervisor),
            ..BranchOptions::default()
        };
        let mut branch = Branch::new(config, Arc::new(MemoryTransport), options)
            .await
            .expect("branch construction");

        let branch_id = branch.id.clone();
        let store = branch.store().clone();
        let state = Arc::clone(branch.state());
        let local = Arc::clone(branch.local_manager());
        let clients = branch.http_state().clients.clone();
        let router = router(branch.http_state().clone());
        let exit = branch.exit_token();

        let ready = Completion::new();
        let ready_clone = Arc::clone(&ready);
        let run = tokio::spawn(async move {
            let _ = branch.run(Some(ready_clone)).await;
        });
        tokio::time::timeout(Duration::from_secs(10), ready.wait())
            .await
            .expect("branch became ready");

        let broker = Broker::new(Arc::new(MemoryTransport), broker_url, Duration::from_millis(200))
            .expect("broker");
        TestBranch {
            branch_id,
            router,
            store,
            state,
            local,
            clients,
            broker,
            runner,
            broker_url: broker_url.to_string(),
            instance_root,
            workers,
            exit,
            run: Some(run),
            _dir: dir,
        }
    }

    /// Whether the branch process is still running.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }

    /// Spawn a fake worker for `name` with a live pid file. The worker
    /// starts silent (as if the process were down) until the runner
    /// "restarts" it.
    pub async fn spawn_worker(&self, name: &str) -> Arc<FakeWorkerHandle> {
        let work_dir = self.instance_root.join(name);
        std::fs::create_dir_all(&work_dir).expect("work dir");
        std::fs::write(work_dir.join("worker.pid"), format!("{}\n", std::process::id()))
            .expect("pidfile");
        let worker =
            Arc::new(FakeWorker::spawn(&self.broker, name).await.expect("fake worker"));
        worker.kill();
        self.workers.lock().insert(name.to_string(), Arc::clone(&worker));
        worker
    }

    pub async fn stop(&mut self) {
        self.exit.cancel();
        if let Some(run) = self.run.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), run).await;
        }
    }
}

/// One HTTP request through the branch router.
pub async fn http(router: &Router, method: &str, path: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll until `check` passes or the deadline hits.
pub async fn eventually<F, Fut>(what: &str, deadline: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}
