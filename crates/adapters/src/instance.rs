// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance adapter.
//!
//! One adapter per branch drives every local worker process: lifecycle
//! through the process runner, liveness through pid file + ping, and
//! consumer/concurrency reconciliation through control broadcasts.

use crate::pid;
use crate::process::{split_args, WorkerAction, WorkerRunner};
use async_trait::async_trait;
use drover_broker::{Broadcast, Broker, BrokerError, BrokerRegistry, ControlClient, Producer};
use drover_core::Config;
use drover_store::{AppRecord, InstanceRecord, QueueRecord, Store, StoreError};
use drover_wire::{ActiveQueue, ConsumerSpec, WorkerStats};
use nix::errno::Errno;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("process manager failed: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// `kill(pid, 0)` failed with something other than ESRCH.
    #[error("signal probe failed for pid {pid}: {errno}")]
    Signal { pid: i32, errno: Errno },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue lookup failed: {0}")]
    Lookup(String),
}

impl AdapterError {
    /// Whether the insured wrapper should retry this.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AdapterError::Broker(err) if err.is_connection_error())
    }
}

impl drover_broker::Insurable for AdapterError {
    fn is_connection_error(&self) -> bool {
        AdapterError::is_connection_error(self)
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    /// No peer advertises the queue name.
    #[error("no route to queue {0}")]
    NoRoute(String),

    #[error("{0}")]
    Failed(String),
}

/// Resolves a queue name to its descriptor.
///
/// Production wires the Queue actor here (local store first, then
/// peers); tests and offline tools use the store-backed lookup.
#[async_trait]
pub trait QueueDirectory: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<QueueRecord, LookupError>;
}

/// Directory answering from the local store only.
pub struct StoreQueueDirectory {
    store: Store,
}

impl StoreQueueDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueDirectory for StoreQueueDirectory {
    async fn lookup(&self, name: &str) -> Result<QueueRecord, LookupError> {
        self.store.queue_get(name).ok_or_else(|| LookupError::NoRoute(name.to_string()))
    }
}

/// Drives the worker process behind one instance record.
pub struct InstanceAdapter {
    store: Store,
    registry: Arc<BrokerRegistry>,
    runner: Arc<dyn WorkerRunner>,
    queues: Arc<dyn QueueDirectory>,
    instance_root: PathBuf,
    default_pool: String,
    control: ControlClient,
    /// One in-flight process-manager invocation per branch process.
    process_mutex: tokio::sync::Mutex<()>,
    reply_timeout: Duration,
}

impl InstanceAdapter {
    pub fn new(
        store: Store,
        registry: Arc<BrokerRegistry>,
        runner: Arc<dyn WorkerRunner>,
        queues: Arc<dyn QueueDirectory>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            registry,
            runner,
            queues,
            instance_root: config.instance_dir.clone(),
            default_pool: config.default_pool.clone(),
            control: ControlClient,
            process_mutex: tokio::sync::Mutex::new(()),
            reply_timeout: Duration::from_secs(3),
        }
    }

    /// Override the control reply timeout (tests use a short one).
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Broker pool serving this instance.
    pub fn broker_for(&self, instance: &InstanceRecord) -> Result<Arc<Broker>, BrokerError> {
        self.registry.get(&self.store.broker_url_for(instance))
    }

    /// Pool for the process-wide default broker.
    pub fn default_broker(&self) -> Result<Arc<Broker>, BrokerError> {
        self.registry.get(self.store.default_broker_url())
    }

    // ----- process lifecycle ---------------------------------------------

    pub async fn start(&self, instance: &InstanceRecord) -> Result<(), AdapterError> {
        self.action(WorkerAction::Start, instance).await
    }

    pub async fn stop(&self, instance: &InstanceRecord) -> Result<(), AdapterError> {
        self.action(WorkerAction::Stop, instance).await
    }

    pub async fn restart(&self, instance: &InstanceRecord) -> Result<(), AdapterError> {
        self.action(WorkerAction::Restart, instance).await
    }

    /// Stop and wait for the worker to actually exit.
    pub async fn stop_verify(&self, instance: &InstanceRecord) -> Result<(), AdapterError> {
        self.action(WorkerAction::StopVerify, instance).await
    }

    async fn action(
        &self,
        action: WorkerAction,
        instance: &InstanceRecord,
    ) -> Result<(), AdapterError> {
        let argv = self.build_argv(action, instance)?;
        let _guard = self.process_mutex.lock().await;
        self.runner.run(action, &argv).await
    }

    fn build_argv(
        &self,
        action: WorkerAction,
        instance: &InstanceRecord,
    ) -> Result<Vec<String>, AdapterError> {
        let dir = instance.work_dir(&self.instance_root)?;
        let app =
            self.store.app_get(&instance.app).unwrap_or_else(|| AppRecord::new(&instance.app));
        let broker_url = self.store.broker_url_for(instance);

        let mut argv: Vec<String> = vec![
            action.as_str().to_string(),
            "--nosplash".to_string(),
            "--suffix=\"\"".to_string(),
            "--no-color".to_string(),
            instance.name.clone(),
        ];
        argv.extend([
            format!("--broker={broker_url}"),
            format!("--workdir={}", dir.display()),
            format!("--pidfile={}", instance.pidfile(&self.instance_root).display()),
            format!("--logfile={}", instance.logfile(&self.instance_root).display()),
            format!("--queues={}", instance.direct_queue()),
            format!("--statedb={}", instance.statedb(&self.instance_root).display()),
            "--events".to_string(),
            format!("--pool={}", instance.pool.as_deref().unwrap_or(&self.default_pool)),
            "--loglevel=INFO".to_string(),
            format!("--autoscale={},{}", instance.max_concurrency, instance.min_concurrency),
        ]);
        argv.extend(split_args(app.arguments.as_deref().unwrap_or_default()));
        argv.extend(split_args(instance.arguments.as_deref().unwrap_or_default()));
        argv.push("--".to_string());
        argv.extend(
            [
                "celeryd.prefetch_multiplier=10",
                "celery.acks_late=yes",
                "celery.task_result_expires=3600",
                "celery.send_task_sent_event=yes",
            ]
            .map(str::to_string),
        );
        argv.extend(split_args(app.extra_config.as_deref().unwrap_or_default()));
        argv.extend(split_args(instance.extra_config.as_deref().unwrap_or_default()));
        Ok(argv)
    }

    // ----- liveness ------------------------------------------------------

    /// Pid responds to signals AND the worker answers a ping broadcast.
    pub async fn alive(
        &self,
        instance: &InstanceRecord,
        producer: Option<&dyn Producer>,
    ) -> Result<bool, AdapterError> {
        if !self.responds_to_signal(instance)? {
            return Ok(false);
        }
        self.responds_to_ping(instance, producer, self.reply_timeout).await
    }

    /// Pid file readable and the pid accepts signal 0.
    pub fn responds_to_signal(&self, instance: &InstanceRecord) -> Result<bool, AdapterError> {
        let Some(raw_pid) = pid::read_pid(&instance.pidfile(&self.instance_root)) else {
            return Ok(false);
        };
        pid::signal_probe(raw_pid).map_err(|errno| AdapterError::Signal { pid: raw_pid, errno })
    }

    /// Truthy iff any ping reply maps this instance within `timeout`.
    pub async fn responds_to_ping(
        &self,
        instance: &InstanceRecord,
        producer: Option<&dyn Producer>,
        timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let reply = self.query(instance, producer, "ping", Value::Null, timeout).await?;
        Ok(reply.is_some_and(|payload| !payload.is_null()))
    }

    // ----- control queries -----------------------------------------------

    /// The worker's stats block, `None` when it did not answer.
    pub async fn stats(
        &self,
        instance: &InstanceRecord,
        producer: Option<&dyn Producer>,
    ) -> Result<Option<WorkerStats>, AdapterError> {
        match self.query(instance, producer, "stats", Value::Null, self.reply_timeout).await? {
            Some(payload) => Ok(serde_json::from_value(payload).ok()),
            None => Ok(None),
        }
    }

    /// Queues the worker currently consumes, keyed by name. Empty when
    /// the worker did not answer.
    pub async fn consuming_from(
        &self,
        instance: &InstanceRecord,
        producer: Option<&dyn Producer>,
    ) -> Result<Option<HashMap<String, ActiveQueue>>, AdapterError> {
        let Some(payload) =
            self.query(instance, producer, "active_queues", Value::Null, self.reply_timeout).await?
        else {
            return Ok(None);
        };
        let queues: Vec<ActiveQueue> = serde_json::from_value(payload).unwrap_or_default();
        Ok(Some(queues.into_iter().map(|q| (q.name.clone(), q)).collect()))
    }

    /// Tell the worker to consume `queue`, resolving the name through
    /// the queue directory.
    ///
    /// An unroutable name is removed from this instance's declared set
    /// with a warning; that is reconciliation, not an error.
    pub async fn add_queue(
        &self,
        instance: &InstanceRecord,
        queue: &str,
        producer: Option<&dyn Producer>,
    ) -> Result<Option<Value>, AdapterError> {
        match self.queues.lookup(queue).await {
            Ok(record) => self.add_queue_record(instance, &record, producer).await,
            Err(LookupError::NoRoute(name)) => {
                self.store.remove_queue_from_instances(&name, Some(&instance.name));
                warn!(instance = %instance.name, queue = %name, "removed unknown consumer");
                Ok(None)
            }
            Err(LookupError::Failed(message)) => Err(AdapterError::Lookup(message)),
        }
    }

    /// Tell the worker to consume an already-resolved queue.
    pub async fn add_queue_record(
        &self,
        instance: &InstanceRecord,
        queue: &QueueRecord,
        producer: Option<&dyn Producer>,
    ) -> Result<Option<Value>, AdapterError> {
        let spec = ConsumerSpec {
            queue: queue.name.clone(),
            exchange: queue
                .exchange
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| queue.name.clone()),
            exchange_type: queue.exchange_type.clone(),
            routing_key: queue
                .routing_key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| queue.name.clone()),
            options: queue.options_map(),
        };
        let arguments = serde_json::to_value(&spec).map_err(BrokerError::from)?;
        self.query(instance, producer, "add_consumer", arguments, self.reply_timeout).await
    }

    /// Tell the worker to stop consuming `queue`.
    pub async fn cancel_queue(
        &self,
        instance: &InstanceRecord,
        queue: &str,
        producer: Option<&dyn Producer>,
    ) -> Result<Option<Value>, AdapterError> {
        self.query(instance, producer, "cancel_consumer", json!({ "queue": queue }), self.reply_timeout)
            .await
    }

    /// Persist a new max/min pair and push it to the worker.
    pub async fn autoscale(
        &self,
        instance: &InstanceRecord,
        max: Option<u32>,
        min: Option<u32>,
        producer: Option<&dyn Producer>,
    ) -> Result<InstanceRecord, AdapterError> {
        let updated = self.store.instance_set_autoscale(&instance.name, max, min)?;
        self.query(
            &updated,
            producer,
            "autoscale",
            json!({ "max": updated.max_concurrency, "min": updated.min_concurrency }),
            self.reply_timeout,
        )
        .await?;
        Ok(updated)
    }

    /// Broadcast `command` restricted to this instance and return its
    /// reply payload, `None` on timeout.
    async fn query(
        &self,
        instance: &InstanceRecord,
        producer: Option<&dyn Producer>,
        command: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Option<Value>, AdapterError> {
        let broker = self.broker_for(instance)?;
        let broadcast = Broadcast::new(command)
            .arguments(arguments)
            .destination(vec![instance.name.clone()])
            .timeout(timeout)
            .limit(1);
        let replies = self.control.broadcast(&broker, producer, broadcast).await?;
        Ok(replies.into_iter().find(|r| r.instance == instance.name).map(|r| r.payload))
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
