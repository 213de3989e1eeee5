// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the worker control protocol.
//!
//! Commands broadcast on the control exchange; each call gets its own
//! exclusive reply queue and collects correlated replies until the
//! timeout (or an expected count) is reached. No replies is a normal
//! outcome, not an error.

use crate::error::BrokerError;
use crate::pool::Broker;
use crate::transport::{ExchangeKind, Producer};
use crate::{CONTROL_EXCHANGE, REPLY_PREFIX};
use drover_wire::{ControlReply, ControlRequest};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One broadcast, ready to send.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub command: String,
    pub arguments: Value,
    /// Restrict handling to these instance names.
    pub destination: Option<Vec<String>>,
    pub timeout: Duration,
    /// Stop collecting after this many replies.
    pub limit: Option<usize>,
}

impl Broadcast {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Value::Null,
            destination: None,
            timeout: Duration::from_secs(3),
            limit: None,
        }
    }

    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn destination(mut self, names: Vec<String>) -> Self {
        self.destination = Some(names);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Publishes control commands and gathers worker replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlClient;

impl ControlClient {
    /// Send `broadcast`, returning whatever replies arrived in time.
    ///
    /// A producer supplied by the caller is used as-is; otherwise one is
    /// checked out of the broker's pool for the duration of the call.
    pub async fn broadcast(
        &self,
        broker: &Broker,
        producer: Option<&dyn Producer>,
        broadcast: Broadcast,
    ) -> Result<Vec<ControlReply>, BrokerError> {
        let conn = broker.connection().await?;
        conn.declare_exchange(CONTROL_EXCHANGE, ExchangeKind::Fanout).await?;

        let correlation_id = drover_core::uuid();
        let reply_queue = format!("{REPLY_PREFIX}.{correlation_id}");
        conn.declare_queue(&reply_queue, true).await?;
        let mut replies = conn.consume(&reply_queue).await?;

        let request = ControlRequest {
            command: broadcast.command.clone(),
            arguments: broadcast.arguments.clone(),
            destination: broadcast.destination.clone(),
            reply_to: Some(reply_queue.clone()),
            correlation_id: correlation_id.clone(),
        };
        let payload = serde_json::to_vec(&request)?;
        match producer {
            Some(producer) => producer.publish(CONTROL_EXCHANGE, "", &payload).await?,
            None => {
                let pooled = broker.producer().await?;
                pooled.publish(CONTROL_EXCHANGE, "", &payload).await?;
            }
        }

        let mut collected = Vec::new();
        let deadline = Instant::now() + broadcast.timeout;
        loop {
            if broadcast.limit.is_some_and(|limit| collected.len() >= limit) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, replies.recv()).await {
                Ok(Some(delivery)) => {
                    match serde_json::from_slice::<ControlReply>(&delivery.payload) {
                        Ok(reply) if reply.correlation_id == correlation_id => {
                            collected.push(reply)
                        }
                        Ok(stale) => {
                            debug!(correlation_id = %stale.correlation_id, "stale control reply")
                        }
                        Err(err) => warn!(error = %err, "undecodable control reply"),
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        if let Err(err) = conn.delete_queue(&reply_queue).await {
            debug!(error = %err, "failed to delete reply queue");
        }
        Ok(collected)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake_worker {
    //! A worker stand-in answering control commands like a live one.

    use super::*;
    use drover_wire::{ActiveQueue, ConsumerSpec};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    struct WorkerState {
        alive: bool,
        max: u32,
        min: u32,
        queues: Vec<ActiveQueue>,
    }

    pub struct FakeWorker;

    impl FakeWorker {
        /// Start a fake worker named `name` on `broker`. It consumes the
        /// control exchange and answers while alive.
        pub async fn spawn(
            broker: &Broker,
            name: &str,
        ) -> Result<FakeWorkerHandle, BrokerError> {
            let state = Arc::new(Mutex::new(WorkerState {
                alive: true,
                max: 1,
                min: 1,
                queues: vec![ActiveQueue {
                    name: format!("dq.{name}"),
                    exchange: None,
                    exchange_type: None,
                    routing_key: None,
                }],
            }));
            let conn = broker.connection().await?;
            conn.declare_exchange(CONTROL_EXCHANGE, ExchangeKind::Fanout).await?;
            let control_queue = format!("{CONTROL_EXCHANGE}.{name}.{}", drover_core::uuid());
            conn.declare_queue(&control_queue, true).await?;
            conn.bind_queue(&control_queue, CONTROL_EXCHANGE, "").await?;
            let mut commands = conn.consume(&control_queue).await?;
            let producer = conn.producer().await?;

            let task_state = Arc::clone(&state);
            let task_name = name.to_string();
            let task = tokio::spawn(async move {
                while let Some(delivery) = commands.recv().await {
                    let Ok(request) = serde_json::from_slice::<ControlRequest>(&delivery.payload)
                    else {
                        continue;
                    };
                    let Some(payload) = handle(&task_state, &task_name, &request) else {
                        continue;
                    };
                    let Some(reply_to) = request.reply_to.as_deref() else { continue };
                    let reply = ControlReply {
                        instance: task_name.clone(),
                        correlation_id: request.correlation_id.clone(),
                        payload,
                    };
                    let Ok(bytes) = serde_json::to_vec(&reply) else { continue };
                    let _ = producer.publish("", reply_to, &bytes).await;
                }
            });

            Ok(FakeWorkerHandle { state, task })
        }
    }

    fn handle(
        state: &Mutex<WorkerState>,
        name: &str,
        request: &ControlRequest,
    ) -> Option<Value> {
        let mut state = state.lock();
        if !state.alive || !request.addressed_to(name) {
            return None;
        }
        match request.command.as_str() {
            "ping" => Some(json!({"ok": "pong"})),
            "stats" => Some(json!({"autoscaler": {"max": state.max, "min": state.min}})),
            "active_queues" => serde_json::to_value(&state.queues).ok(),
            "add_consumer" => {
                let spec: ConsumerSpec = serde_json::from_value(request.arguments.clone()).ok()?;
                if !state.queues.iter().any(|q| q.name == spec.queue) {
                    state.queues.push(ActiveQueue {
                        name: spec.queue,
                        exchange: Some(spec.exchange),
                        exchange_type: spec.exchange_type,
                        routing_key: Some(spec.routing_key),
                    });
                }
                Some(json!("ok"))
            }
            "cancel_consumer" => {
                let queue = request.arguments.get("queue")?.as_str()?.to_string();
                state.queues.retain(|q| q.name != queue);
                Some(json!("ok"))
            }
            "autoscale" => {
                if let Some(max) = request.arguments.get("max").and_then(Value::as_u64) {
                    state.max = max as u32;
                }
                if let Some(min) = request.arguments.get("min").and_then(Value::as_u64) {
                    state.min = min as u32;
                }
                Some(json!([state.max, state.min]))
            }
            _ => None,
        }
    }

    /// Handle to a spawned fake worker.
    pub struct FakeWorkerHandle {
        state: Arc<Mutex<WorkerState>>,
        task: JoinHandle<()>,
    }

    impl FakeWorkerHandle {
        /// Stop answering, as a crashed worker would.
        pub fn kill(&self) {
            self.state.lock().alive = false;
        }

        /// Start answering again, as a restarted worker would.
        pub fn revive(&self) {
            self.state.lock().alive = true;
        }

        pub fn is_alive(&self) -> bool {
            self.state.lock().alive
        }

        pub fn autoscaler(&self) -> (u32, u32) {
            let state = self.state.lock();
            (state.max, state.min)
        }

        pub fn active_queue_names(&self) -> Vec<String> {
            self.state.lock().queues.iter().map(|q| q.name.clone()).collect()
        }

        /// Pretend an operator added a consumer out-of-band.
        pub fn add_active_queue(&self, name: &str) {
            let mut state = self.state.lock();
            if !state.queues.iter().any(|q| q.name == name) {
                state.queues.push(ActiveQueue {
                    name: name.to_string(),
                    exchange: None,
                    exchange_type: None,
                    routing_key: None,
                });
            }
        }
    }

    impl Drop for FakeWorkerHandle {
        fn drop(&mut self) {
            self.task.abort();
        }
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
