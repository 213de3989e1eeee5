// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller: hosts the Branch/App/Instance/Queue actors on one
//! broker connection, publishes presence, and feeds peer announcements
//! into the routing table.

use crate::branch::BranchInfo;
use crate::clients::{app_json, app_spec, branch_spec, instance_spec, queue_json, queue_spec};
use crate::managers::LocalInstanceManager;
use crate::signals::{Signal, SignalHub};
use crate::state::BranchState;
use crate::supervisor::SupervisorOptions;
use crate::task::{Task, TaskContext, TaskError, Timers};
use async_trait::async_trait;
use drover_actors::{
    listen_for_presence, publish_presence, ActorHost, ActorSpec, ActorState, HandlerError,
    HandlerResult, RoutingTable,
};
use drover_adapters::InstanceAdapter;
use drover_broker::{Broker, ConnectionEvents};
use drover_core::{Clock, Config, RetryPolicy, SystemClock};
use drover_store::{InstanceSpec, Store};
use drover_wire::{ActorMeta, PresenceAnnounce};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handlers that change advertised names re-announce presence right
/// after committing, so peers can route to them without waiting a full
/// presence interval.
const ANNOUNCE_AFTER: &[(&str, &str)] = &[
    ("Instance", "add"),
    ("Instance", "remove"),
    ("Queue", "add"),
    ("Queue", "delete"),
];

fn unknown_method(actor: &str, method: &str) -> HandlerError {
    HandlerError::failure(format!("{actor} has no method {method:?}"))
}

fn arg_str(args: &Value, key: &str) -> Result<String, HandlerError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HandlerError::failure(format!("missing argument {key:?}")))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

// ----- Branch actor ------------------------------------------------------

struct BranchActorState {
    spec: ActorSpec,
    info: BranchInfo,
    exit: CancellationToken,
}

#[async_trait]
impl ActorState for BranchActorState {
    fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    async fn dispatch(&self, method: &str, args: &Value) -> HandlerResult {
        match method {
            "id" => Ok(json!(self.info.id)),
            "url" => Ok(json!(self.info.url)),
            "about" => serde_json::to_value(&self.info).map_err(HandlerError::failure),
            "shutdown" => {
                let id = arg_str(args, "id")?;
                if id == self.info.id || id == "*" {
                    warn!("shutdown requested from remote");
                    self.exit.cancel();
                    Ok(json!("ok"))
                } else {
                    Err(HandlerError::Next)
                }
            }
            other => Err(unknown_method("Branch", other)),
        }
    }

    fn meta(&self) -> ActorMeta {
        ActorMeta::from([("this".to_string(), vec![self.info.id.clone()])])
    }
}

// ----- App actor ---------------------------------------------------------

struct AppActorState {
    spec: ActorSpec,
    store: Store,
    instance_dir: PathBuf,
}

#[async_trait]
impl ActorState for AppActorState {
    fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    async fn dispatch(&self, method: &str, args: &Value) -> HandlerResult {
        match method {
            "all" => {
                let mut names: Vec<String> =
                    self.store.apps().into_iter().map(|a| a.name).collect();
                names.sort();
                Ok(json!(names))
            }
            "add" => {
                let record = self.store.app_add(
                    &arg_str(args, "name")?,
                    opt_str(args, "broker"),
                    opt_str(args, "arguments"),
                    opt_str(args, "extra_config"),
                );
                Ok(app_json(&self.store, &record))
            }
            "delete" => {
                self.store.app_delete(&arg_str(args, "name")?);
                Ok(json!("ok"))
            }
            "get" => match self.store.app_get(&arg_str(args, "name")?) {
                Some(record) => Ok(app_json(&self.store, &record)),
                None => Err(HandlerError::Next),
            },
            "metrics" => Ok(json!({
                "load_average": load_average(),
                "disk_use": disk_use(&self.instance_dir),
            })),
            other => Err(unknown_method("App", other)),
        }
    }
}

/// 1/5/15 minute load averages; zeros off-Linux.
fn load_average() -> [f64; 3] {
    let Ok(raw) = std::fs::read_to_string("/proc/loadavg") else {
        return [0.0; 3];
    };
    let mut parts = raw.split_whitespace().filter_map(|p| p.parse().ok());
    [
        parts.next().unwrap_or(0.0),
        parts.next().unwrap_or(0.0),
        parts.next().unwrap_or(0.0),
    ]
}

/// Percent of the filesystem holding the instance directory in use.
fn disk_use(path: &Path) -> f64 {
    let probe = if path.exists() { path } else { Path::new(".") };
    match nix::sys::statvfs::statvfs(probe) {
        Ok(stat) if stat.blocks() > 0 => {
            let total = stat.blocks() as f64;
            let avail = stat.blocks_available() as f64;
            (100.0 * (total - avail) / total).round()
        }
        _ => 0.0,
    }
}

// ----- Instance actor ----------------------------------------------------

struct InstanceActorState {
    spec: ActorSpec,
    store: Store,
    local: Arc<LocalInstanceManager>,
    adapter: Arc<InstanceAdapter>,
}

impl InstanceActorState {
    fn instance_json(&self, record: &drover_store::InstanceRecord) -> Value {
        json!({
            "name": record.name,
            "app": record.app,
            "queues": record.queues.iter().collect::<Vec<_>>(),
            "max_concurrency": record.max_concurrency,
            "min_concurrency": record.min_concurrency,
            "is_enabled": record.is_enabled,
            "broker": self.store.broker_url_for(record),
            "pool": record.pool,
            "arguments": record.arguments,
            "extra_config": record.extra_config,
        })
    }
}

#[async_trait]
impl ActorState for InstanceActorState {
    fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    async fn dispatch(&self, method: &str, args: &Value) -> HandlerResult {
        match method {
            "all" => {
                let records = match opt_str(args, "app") {
                    Some(app) => self.store.instances_for_app(&app),
                    None => self.store.instances(),
                };
                let mut names: Vec<String> = records.into_iter().map(|i| i.name).collect();
                names.sort();
                Ok(json!(names))
            }
            "get" => match self.store.instance_get(&arg_str(args, "name")?) {
                Some(record) => Ok(self.instance_json(&record)),
                None => Err(HandlerError::Next),
            },
            "add" => {
                let spec: InstanceSpec =
                    serde_json::from_value(args.clone()).map_err(HandlerError::failure)?;
                let record =
                    self.local.add(spec, false).await.map_err(HandlerError::failure)?;
                Ok(self.instance_json(&record))
            }
            "remove" => {
                self.local
                    .remove(&arg_str(args, "name")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "restart" => {
                self.local
                    .restart(&arg_str(args, "name")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "enable" => {
                self.local
                    .enable(&arg_str(args, "name")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "disable" => {
                self.local
                    .disable(&arg_str(args, "name")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "add_consumer" => {
                self.local
                    .add_consumer(&arg_str(args, "name")?, &arg_str(args, "queue")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "cancel_consumer" => {
                self.local
                    .cancel_consumer(&arg_str(args, "name")?, &arg_str(args, "queue")?, false)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!("ok"))
            }
            "remove_queue_from_all" => {
                let changed = self.local.remove_queue(&arg_str(args, "queue")?, false).await;
                Ok(json!(changed.into_iter().map(|i| i.name).collect::<Vec<_>>()))
            }
            "autoscale" => {
                let record = self.local.get(&arg_str(args, "name")?).map_err(HandlerError::failure)?;
                let max = args.get("max").and_then(Value::as_u64).map(|v| v as u32);
                let min = args.get("min").and_then(Value::as_u64).map(|v| v as u32);
                let updated = self
                    .adapter
                    .autoscale(&record, max, min, None)
                    .await
                    .map_err(HandlerError::failure)?;
                Ok(json!({ "max": updated.max_concurrency, "min": updated.min_concurrency }))
            }
            "consuming_from" => {
                let record = self.local.get(&arg_str(args, "name")?).map_err(HandlerError::failure)?;
                let consuming = self
                    .adapter
                    .consuming_from(&record, None)
                    .await
                    .map_err(HandlerError::failure)?
                    .unwrap_or_default();
                serde_json::to_value(consuming).map_err(HandlerError::failure)
            }
            "stats" => {
                let record = self.local.get(&arg_str(args, "name")?).map_err(HandlerError::failure)?;
                let stats =
                    self.adapter.stats(&record, None).await.map_err(HandlerError::failure)?;
                serde_json::to_value(stats).map_err(HandlerError::failure)
            }
            other => Err(unknown_method("Instance", other)),
        }
    }

    fn meta(&self) -> ActorMeta {
        let names = self.store.instances().into_iter().map(|i| i.name).collect();
        ActorMeta::from([("instances".to_string(), names)])
    }
}

// ----- Queue actor -------------------------------------------------------

struct QueueActorState {
    spec: ActorSpec,
    store: Store,
}

#[async_trait]
impl ActorState for QueueActorState {
    fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    async fn dispatch(&self, method: &str, args: &Value) -> HandlerResult {
        match method {
            "all" => {
                let mut names: Vec<String> =
                    self.store.queues().into_iter().map(|q| q.name).collect();
                names.sort();
                Ok(json!(names))
            }
            "get" => match self.store.queue_get(&arg_str(args, "name")?) {
                Some(record) => Ok(queue_json(&record)),
                None => Err(HandlerError::Next),
            },
            "add" => {
                let options = args.get("options").and_then(Value::as_object).cloned();
                let record = self.store.queue_add(
                    &arg_str(args, "name")?,
                    opt_str(args, "exchange"),
                    opt_str(args, "exchange_type"),
                    opt_str(args, "routing_key"),
                    options,
                );
                Ok(queue_json(&record))
            }
            "delete" => {
                self.store.queue_delete(&arg_str(args, "name")?);
                Ok(json!("ok"))
            }
            other => Err(unknown_method("Queue", other)),
        }
    }

    fn meta(&self) -> ActorMeta {
        let names = self.store.queues().into_iter().map(|q| q.name).collect();
        ActorMeta::from([("queues".to_string(), names)])
    }
}

// ----- Controller --------------------------------------------------------

/// Everything a controller needs, bundled so the branch can stamp out N
/// of them.
pub struct ControllerSeed {
    pub index: usize,
    pub info: BranchInfo,
    pub broker: Arc<Broker>,
    pub store: Store,
    pub local: Arc<LocalInstanceManager>,
    pub adapter: Arc<InstanceAdapter>,
    pub router: Arc<RoutingTable>,
    pub state: Arc<BranchState>,
    pub signals: SignalHub,
    pub config: Config,
    pub exit: CancellationToken,
}

pub struct Controller {
    id: String,
    branch_id: String,
    broker: Arc<Broker>,
    actors: Vec<Arc<dyn ActorState>>,
    router: Arc<RoutingTable>,
    state: Arc<BranchState>,
    signals: SignalHub,
    presence_interval: Duration,
    retry: RetryPolicy,
    ready_sent: bool,
    presence_ready_sent: Arc<std::sync::atomic::AtomicBool>,
    presence_cancel: CancellationToken,
    presence_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(seed: ControllerSeed) -> Self {
        let branch_id = seed.info.id.clone();
        let id = format!("{}.{}", branch_id, seed.index);
        let actors: Vec<Arc<dyn ActorState>> = vec![
            Arc::new(BranchActorState {
                spec: branch_spec(),
                info: seed.info.clone(),
                exit: seed.exit.clone(),
            }),
            Arc::new(AppActorState {
                spec: app_spec(),
                store: seed.store.clone(),
                instance_dir: seed.config.instance_dir.clone(),
            }),
            Arc::new(InstanceActorState {
                spec: instance_spec(),
                store: seed.store.clone(),
                local: Arc::clone(&seed.local),
                adapter: Arc::clone(&seed.adapter),
            }),
            Arc::new(QueueActorState { spec: queue_spec(), store: seed.store }),
        ];
        Self {
            id,
            branch_id,
            broker: seed.broker,
            actors,
            router: seed.router,
            state: seed.state,
            signals: seed.signals,
            presence_interval: seed.config.presence_interval,
            retry: SupervisorOptions::default().retry,
            ready_sent: false,
            presence_ready_sent: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            presence_cancel: CancellationToken::new(),
            presence_task: None,
            listener_task: None,
        }
    }

    fn build_announce(branch_id: &str, actors: &[Arc<dyn ActorState>]) -> PresenceAnnounce {
        let mut meta = HashMap::new();
        for actor in actors {
            let actor_meta = actor.meta();
            if !actor_meta.is_empty() {
                meta.insert(actor.spec().name.to_string(), actor_meta);
            }
        }
        PresenceAnnounce { branch_id: branch_id.to_string(), meta, ts_ms: SystemClock.wall_ms() }
    }

    fn spawn_presence(&mut self) {
        let broker = Arc::clone(&self.broker);
        let actors = self.actors.clone();
        let branch_id = self.branch_id.clone();
        let signals = self.signals.clone();
        let id = self.id.clone();
        let interval = self.presence_interval;
        let cancel = self.presence_cancel.clone();
        let ready_sent = Arc::clone(&self.presence_ready_sent);
        self.presence_task = Some(tokio::spawn(async move {
            loop {
                let announce = Self::build_announce(&branch_id, &actors);
                match publish_presence(&broker, &announce).await {
                    Ok(()) => {
                        if !ready_sent.swap(true, std::sync::atomic::Ordering::SeqCst) {
                            signals.emit(Signal::PresenceReady(id.clone()));
                        }
                    }
                    Err(err) => debug!(error = %err, "presence publish failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }));
    }

    async fn announce_now(&self) {
        let announce = Self::build_announce(&self.branch_id, &self.actors);
        if let Err(err) = publish_presence(&self.broker, &announce).await {
            debug!(error = %err, "presence publish failed");
        }
    }
}

#[async_trait]
impl Task for Controller {
    fn name(&self) -> String {
        format!("controller:{}", self.id)
    }

    async fn before(&mut self, _timers: &Timers) -> Result<(), TaskError> {
        self.spawn_presence();
        Ok(())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let mut had_failure = false;
        'reconnect: while !ctx.should_stop() {
            let conn = match self.broker.connection().await {
                Ok(conn) => conn,
                Err(err) => {
                    self.state.on_connection_error(&err, self.retry.first);
                    had_failure = true;
                    ctx.respond_to_ping();
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.first) => continue 'reconnect,
                        _ = ctx.cancelled() => break 'reconnect,
                    }
                }
            };
            if had_failure {
                self.state.on_broker_revive();
                had_failure = false;
            }

            // feed peer announcements into the routing table
            if let Some(task) = self.listener_task.take() {
                task.abort();
            }
            match listen_for_presence(&conn, &self.branch_id).await {
                Ok(mut sub) => {
                    let router = Arc::clone(&self.router);
                    self.listener_task = Some(tokio::spawn(async move {
                        while let Some(delivery) = sub.recv().await {
                            if let Ok(announce) =
                                serde_json::from_slice::<PresenceAnnounce>(&delivery.payload)
                            {
                                router.apply(&announce);
                            }
                        }
                    }));
                }
                Err(err) => {
                    debug!(error = %err, "presence listener failed, reconnecting");
                    continue 'reconnect;
                }
            }

            let mut bound = match ActorHost::new(self.branch_id.clone(), self.actors.clone())
                .bind(&conn)
                .await
            {
                Ok(bound) => bound,
                Err(err) => {
                    self.state.on_connection_error(&err, self.retry.first);
                    had_failure = true;
                    continue 'reconnect;
                }
            };
            if !self.ready_sent {
                info!(controller = %self.id, "consuming");
                self.signals.emit(Signal::ControllerReady(self.id.clone()));
                self.ready_sent = true;
            }

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break 'reconnect,
                    message = bound.next() => {
                        ctx.respond_to_ping();
                        let Some((idx, delivery)) = message else {
                            // consumers gone: connection-level failure
                            self.state.on_connection_error(&"consume stream ended", self.retry.first);
                            had_failure = true;
                            continue 'reconnect;
                        };
                        let dispatched = bound.dispatch(idx, delivery).await;
                        if let Some((actor, method)) = dispatched {
                            if ANNOUNCE_AFTER.contains(&(actor, method.as_str())) {
                                self.announce_now().await;
                            }
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        ctx.respond_to_ping();
                    }
                }
            }
        }

        // graceful stop: let the presence subtask exit before dropping
        // the connection
        debug!(controller = %self.id, "waiting for presence to exit");
        ctx.shutdown_step();
        self.presence_cancel.cancel();
        if let Some(task) = self.presence_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        ctx.shutdown_step();
        Ok(())
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
