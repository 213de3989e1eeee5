// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor.
//!
//! Wakes at intervals to reconcile every declared instance against its
//! live worker, and serves explicit verify/restart/shutdown requests
//! from its mailbox. It stops removed instances, restarts unresponsive
//! ones (rate limited so a crash-looping instance gets disabled instead
//! of hammered), and sends `add_consumer`/`cancel_consumer`/`autoscale`
//! commands when the worker drifts from the model.
//!
//! Broker trouble pauses the supervisor; a revival resumes it, and
//! automated restarts are refused until the workers have had
//! `wait_after_broker_revived` to reconnect themselves.

use crate::signals::{Signal, SignalHub};
use crate::state::BranchState;
use crate::task::{Task, TaskContext, TaskError, Timers};
use async_trait::async_trait;
use drover_adapters::{AdapterError, InstanceAdapter};
use drover_broker::insured;
use drover_core::{Clock, PingSchedule, Rate, RetryPolicy, SystemClock, TokenBucket};
use drover_store::{InstanceRecord, Store};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Completion handle for one supervisor request.
pub struct Completion {
    tx: watch::Sender<bool>,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    /// A handle that is already resolved.
    pub fn completed() -> Arc<Self> {
        let completion = Self::new();
        completion.complete();
        completion
    }

    pub fn complete(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Verify,
    Restart,
    Shutdown,
    /// Periodic tick: enqueue a full-fleet verify.
    VerifyAllTick,
}

struct Request {
    instances: Vec<InstanceRecord>,
    completion: Arc<Completion>,
    action: Action,
    ratelimit: bool,
}

/// The supervisor contract, implemented by the live handle and by the
/// offline null object.
pub trait Supervise: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn verify(&self, instances: Vec<InstanceRecord>, ratelimit: bool) -> Arc<Completion>;
    fn restart(&self, instances: Vec<InstanceRecord>) -> Arc<Completion>;
    fn shutdown(&self, instances: Vec<InstanceRecord>) -> Arc<Completion>;
}

/// Null supervisor for processes that are not a branch.
pub struct OfflineSupervisor;

impl Supervise for OfflineSupervisor {
    fn pause(&self) {}
    fn resume(&self) {}

    fn is_paused(&self) -> bool {
        false
    }

    fn verify(&self, _instances: Vec<InstanceRecord>, _ratelimit: bool) -> Arc<Completion> {
        Completion::completed()
    }

    fn restart(&self, _instances: Vec<InstanceRecord>) -> Arc<Completion> {
        Completion::completed()
    }

    fn shutdown(&self, _instances: Vec<InstanceRecord>) -> Arc<Completion> {
        Completion::completed()
    }
}

/// Cheap handle enqueueing requests onto the supervisor mailbox.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Request>,
    /// Guarded so "paused or not" is never observed mid-transition.
    paused: Arc<Mutex<bool>>,
}

impl SupervisorHandle {
    fn request(&self, instances: Vec<InstanceRecord>, action: Action, ratelimit: bool) -> Arc<Completion> {
        let completion = Completion::new();
        let request =
            Request { instances, completion: Arc::clone(&completion), action, ratelimit };
        if self.tx.send(request).is_err() {
            // supervisor gone; resolve so callers don't hang
            completion.complete();
        }
        completion
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }
}

impl Supervise for SupervisorHandle {
    fn pause(&self) {
        let mut paused = self.paused.lock();
        if !*paused {
            debug!("pausing supervisor");
            *paused = true;
        }
    }

    fn resume(&self) {
        let mut paused = self.paused.lock();
        if *paused {
            debug!("resuming supervisor");
            *paused = false;
        }
    }

    fn is_paused(&self) -> bool {
        SupervisorHandle::is_paused(self)
    }

    fn verify(&self, instances: Vec<InstanceRecord>, ratelimit: bool) -> Arc<Completion> {
        self.request(instances, Action::Verify, ratelimit)
    }

    fn restart(&self, instances: Vec<InstanceRecord>) -> Arc<Completion> {
        self.request(instances, Action::Restart, false)
    }

    fn shutdown(&self, instances: Vec<InstanceRecord>) -> Arc<Completion> {
        self.request(instances, Action::Shutdown, false)
    }
}

/// Tunables, split out so tests can tighten every delay.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Interval between full-fleet verifies.
    pub interval: Duration,
    /// Automated restarts allowed per instance before it is disabled.
    pub restart_max_rate: Rate,
    /// Grace period after a broker revival before automated restarts.
    pub wait_after_broker_revived: Duration,
    /// Ping timeout ramp probed after a restart.
    pub ping_schedule: PingSchedule,
    /// Backoff for insured broker operations.
    pub retry: RetryPolicy,
    /// Mailbox poll timeout.
    pub poll_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            restart_max_rate: Rate { count: 1, per_secs: 60.0 },
            wait_after_broker_revived: Duration::from_secs(35),
            ping_schedule: PingSchedule::default(),
            retry: RetryPolicy::default(),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

pub struct Supervisor<C: Clock = SystemClock> {
    rx: mpsc::UnboundedReceiver<Request>,
    handle: SupervisorHandle,
    store: Store,
    adapter: Arc<InstanceAdapter>,
    state: Arc<BranchState>,
    signals: SignalHub,
    options: SupervisorOptions,
    clock: C,
    buckets: HashMap<String, TokenBucket>,
    last_update: Option<Arc<Completion>>,
}

impl Supervisor<SystemClock> {
    pub fn new(
        store: Store,
        adapter: Arc<InstanceAdapter>,
        state: Arc<BranchState>,
        signals: SignalHub,
        options: SupervisorOptions,
    ) -> (Self, SupervisorHandle) {
        Self::with_clock(store, adapter, state, signals, options, SystemClock)
    }
}

impl<C: Clock> Supervisor<C> {
    pub fn with_clock(
        store: Store,
        adapter: Arc<InstanceAdapter>,
        state: Arc<BranchState>,
        signals: SignalHub,
        options: SupervisorOptions,
        clock: C,
    ) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SupervisorHandle { tx, paused: Arc::new(Mutex::new(false)) };
        let supervisor = Self {
            rx,
            handle: handle.clone(),
            store,
            adapter,
            state,
            signals,
            options,
            clock,
            buckets: HashMap::new(),
            last_update: None,
        };
        (supervisor, handle)
    }

    async fn handle_request(&mut self, ctx: &mut TaskContext, request: Request) {
        if request.action == Action::VerifyAllTick {
            if self.handle.is_paused() {
                self.probe_revival().await;
            } else {
                self.verify_all();
            }
            request.completion.complete();
            return;
        }
        debug!(count = request.instances.len(), action = ?request.action, "wake-up");
        for instance in &request.instances {
            ctx.respond_to_ping();
            let outcome = match request.action {
                Action::Verify => self.do_verify_instance(ctx, instance, request.ratelimit).await,
                Action::Restart => self.do_restart_instance(ctx, instance, request.ratelimit).await,
                Action::Shutdown => self.do_stop_instance(instance).await,
                Action::VerifyAllTick => Ok(()),
            };
            if let Err(err) = outcome {
                error!(instance = %instance.name, error = %err, "action caused exception");
            }
        }
        request.completion.complete();
    }

    /// While paused, each tick probes the broker instead of verifying;
    /// the first successful connection counts as the revival.
    async fn probe_revival(&self) {
        let Ok(broker) = self.adapter.default_broker() else { return };
        if broker.connection().await.is_ok() {
            info!("broker is answering again");
            self.state.on_broker_revive();
        }
    }

    /// Enqueue a ratelimited verify of the whole fleet, unless the
    /// previous round is still in flight.
    fn verify_all(&mut self) {
        if let Some(last) = &self.last_update {
            if !last.is_complete() {
                return;
            }
        }
        self.last_update = Some(self.handle.verify(self.store.instances(), true));
    }

    async fn do_verify_instance(
        &mut self,
        ctx: &mut TaskContext,
        instance: &InstanceRecord,
        ratelimit: bool,
    ) -> Result<(), AdapterError> {
        if self.handle.is_paused() {
            return Ok(());
        }
        let current = self.store.instance_get(&instance.name);
        match current {
            Some(record) if record.is_enabled => {
                if !self.insured_alive(&record).await? {
                    self.do_restart_instance(ctx, &record, ratelimit).await?;
                }
                self.verify_instance_processes(&record).await?;
                self.verify_instance_queues(&record).await?;
            }
            // disabled or removed: a live worker must be stopped
            other => {
                let target = other.unwrap_or_else(|| instance.clone());
                if self.insured_alive(&target).await? {
                    self.do_stop_instance(&target).await?;
                }
            }
        }
        Ok(())
    }

    /// Diff the declared queue set against what the worker actually
    /// consumes, and reconcile. The instance's direct queue is always
    /// on and never cancelled.
    async fn verify_instance_queues(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), AdapterError> {
        let declared: BTreeSet<String> = instance.queues.iter().cloned().collect();
        let broker = self.adapter.broker_for(instance)?;
        let reply = insured(&broker, self.state.as_ref(), &self.options.retry, || {
            self.adapter.consuming_from(instance, None)
        })
        .await?;
        let Some(consuming) = reply else { return Ok(()) };
        let actual: BTreeSet<String> = consuming.into_keys().collect();

        for queue in declared.symmetric_difference(&actual) {
            if declared.contains(queue) {
                warn!(instance = %instance.name, queue = %queue, "instance.consume_from");
                insured(&broker, self.state.as_ref(), &self.options.retry, || {
                    self.adapter.add_queue(instance, queue, None)
                })
                .await?;
            } else if *queue == instance.direct_queue() {
                // always-on
            } else {
                warn!(instance = %instance.name, queue = %queue, "instance.cancel_consume");
                insured(&broker, self.state.as_ref(), &self.options.retry, || {
                    self.adapter.cancel_queue(instance, queue, None)
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Push the declared max/min concurrency when the worker's
    /// autoscaler report disagrees. A missing or malformed report means
    /// "unknown" and is skipped.
    async fn verify_instance_processes(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), AdapterError> {
        let broker = self.adapter.broker_for(instance)?;
        let stats = insured(&broker, self.state.as_ref(), &self.options.retry, || {
            self.adapter.stats(instance, None)
        })
        .await?;
        let Some(autoscaler) = stats.and_then(|s| s.autoscaler) else {
            return Ok(());
        };
        if autoscaler.max != instance.max_concurrency || autoscaler.min != instance.min_concurrency
        {
            warn!(
                instance = %instance.name,
                max = instance.max_concurrency,
                min = instance.min_concurrency,
                "instance.set_autoscale"
            );
            insured(&broker, self.state.as_ref(), &self.options.retry, || {
                self.adapter.autoscale(
                    instance,
                    Some(instance.max_concurrency),
                    Some(instance.min_concurrency),
                    None,
                )
            })
            .await?;
        }
        Ok(())
    }

    /// Whether an automated restart is allowed right now: either the
    /// broker never revived, or the workers have had their grace period
    /// to reconnect.
    fn can_restart(&self) -> bool {
        match self.state.time_since_broker_revived() {
            None => true,
            Some(elapsed) => elapsed > self.options.wait_after_broker_revived,
        }
    }

    async fn do_restart_instance(
        &mut self,
        ctx: &mut TaskContext,
        instance: &InstanceRecord,
        ratelimit: bool,
    ) -> Result<(), AdapterError> {
        if !ratelimit {
            self.buckets.remove(&instance.name);
            return self.verify_restart_instance(ctx, instance).await;
        }
        if !self.can_restart() {
            return Ok(());
        }
        let now = self.clock.now();
        let rate = self.options.restart_max_rate;
        let allowed = self
            .buckets
            .entry(instance.name.clone())
            .or_insert_with(|| TokenBucket::new(rate))
            .can_consume(1, now);
        if allowed {
            self.verify_restart_instance(ctx, instance).await
        } else {
            error!(instance = %instance.name, "instance.disabled: restarted too often");
            if let Err(err) = self.store.instance_disable(&instance.name) {
                error!(instance = %instance.name, error = %err, "failed to disable instance");
            }
            self.buckets.remove(&instance.name);
            Ok(())
        }
    }

    /// Restart the worker, then probe it with a rising timeout ramp to
    /// confirm it actually came back. Logs the outcome; never raises.
    async fn verify_restart_instance(
        &self,
        ctx: &mut TaskContext,
        instance: &InstanceRecord,
    ) -> Result<(), AdapterError> {
        warn!(instance = %instance.name, "instance.restart");
        self.adapter.restart(instance).await?;

        let broker = self.adapter.broker_for(instance)?;
        let mut is_alive = false;
        for timeout in self.options.ping_schedule.timeouts() {
            info!(instance = %instance.name, ?timeout, "ping with timeout");
            ctx.respond_to_ping();
            let pong = insured(&broker, self.state.as_ref(), &self.options.retry, || {
                self.adapter.responds_to_ping(instance, None, timeout)
            })
            .await
            .unwrap_or(false);
            if pong {
                is_alive = true;
                break;
            }
        }
        if is_alive {
            warn!(instance = %instance.name, "successfully restarted");
        } else {
            warn!(instance = %instance.name, "instance doesn't respond after restart");
        }
        Ok(())
    }

    async fn do_stop_instance(&self, instance: &InstanceRecord) -> Result<(), AdapterError> {
        warn!(instance = %instance.name, "instance.shutdown");
        self.adapter.stop(instance).await
    }

    async fn insured_alive(&self, instance: &InstanceRecord) -> Result<bool, AdapterError> {
        let broker = self.adapter.broker_for(instance)?;
        insured(&broker, self.state.as_ref(), &self.options.retry, || {
            self.adapter.alive(instance, None)
        })
        .await
    }
}

#[async_trait]
impl<C: Clock> Task for Supervisor<C> {
    fn name(&self) -> String {
        "supervisor".to_string()
    }

    async fn before(&mut self, timers: &Timers) -> Result<(), TaskError> {
        let handle = self.handle.clone();
        timers.start_periodic(self.options.interval, move || {
            let handle = handle.clone();
            async move {
                handle.request(Vec::new(), Action::VerifyAllTick, true);
            }
        });
        Ok(())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        info!("supervisor started");
        self.signals.emit(Signal::SupervisorReady);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                request = self.rx.recv() => {
                    ctx.respond_to_ping();
                    let Some(request) = request else { break };
                    self.handle_request(ctx, request).await;
                }
                _ = tokio::time::sleep(self.options.poll_timeout) => {
                    ctx.respond_to_ping();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
