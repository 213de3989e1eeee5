// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook task dispatch and result polling.
//!
//! The task body simply forwards the original request; workers execute
//! it elsewhere and publish the outcome onto a per-task result queue,
//! which is what the query endpoints poll.

use drover_broker::{BrokerError, BrokerRegistry, ExchangeKind};
use drover_store::QueueRecord;
use drover_wire::{TaskReceipt, TaskResult, TaskState, WebhookTask};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Queue used when a webhook is enqueued without a queue segment.
pub const DEFAULT_TASK_QUEUE: &str = "drover.tasks";

/// Per-task result queue name.
pub fn result_queue(task_id: &str) -> String {
    format!("drover.result.{task_id}")
}

pub struct TaskDispatcher {
    registry: Arc<BrokerRegistry>,
    /// Results already seen; consuming a result queue is destructive,
    /// so remember what came back.
    seen: Mutex<HashMap<String, TaskResult>>,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<BrokerRegistry>) -> Self {
        Self { registry, seen: Mutex::new(HashMap::new()) }
    }

    /// Publish a webhook task onto the queue's exchange through the
    /// app's broker, declaring the route so the message is not lost.
    pub async fn dispatch_webhook(
        &self,
        broker_url: &str,
        queue: Option<&QueueRecord>,
        url: &str,
        method: &str,
        params: HashMap<String, String>,
        data: HashMap<String, String>,
    ) -> Result<TaskReceipt, BrokerError> {
        let broker = self.registry.get(broker_url)?;
        let conn = broker.connection().await?;
        let task = WebhookTask {
            id: drover_core::uuid(),
            url: url.to_string(),
            method: method.to_string(),
            params: params.clone(),
            data: data.clone(),
        };

        let (exchange, routing_key) = match queue {
            Some(queue) => {
                let exchange = queue
                    .exchange
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| queue.name.clone());
                let routing_key = queue
                    .routing_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .unwrap_or_else(|| queue.name.clone());
                conn.declare_exchange(&exchange, ExchangeKind::Direct).await?;
                conn.declare_queue(&queue.name, false).await?;
                conn.bind_queue(&queue.name, &exchange, &routing_key).await?;
                (exchange, routing_key)
            }
            None => {
                conn.declare_queue(DEFAULT_TASK_QUEUE, false).await?;
                (String::new(), DEFAULT_TASK_QUEUE.to_string())
            }
        };

        let producer = broker.producer().await?;
        producer.publish(&exchange, &routing_key, &serde_json::to_vec(&task)?).await?;

        Ok(TaskReceipt {
            uuid: task.id,
            url: url.to_string(),
            queue: queue.map(|q| q.name.clone()),
            method: method.to_string(),
            params,
            data,
            broker: broker_url.to_string(),
        })
    }

    /// Poll the task's result queue, waiting up to `timeout`. Until a
    /// worker publishes a result the task is `PENDING`.
    pub async fn result(
        &self,
        broker_url: &str,
        task_id: &str,
        timeout: Duration,
    ) -> Result<TaskResult, BrokerError> {
        if let Some(cached) = self.seen.lock().get(task_id) {
            return Ok(cached.clone());
        }
        let broker = self.registry.get(broker_url)?;
        let conn = broker.connection().await?;
        let queue = result_queue(task_id);
        conn.declare_queue(&queue, false).await?;
        let mut sub = conn.consume(&queue).await?;

        let pending =
            TaskResult { id: task_id.to_string(), state: TaskState::Pending, result: Value::Null };
        match tokio::time::timeout(timeout, sub.recv()).await {
            Ok(Some(delivery)) => {
                let Ok(result) = serde_json::from_slice::<TaskResult>(&delivery.payload) else {
                    return Ok(pending);
                };
                self.seen.lock().insert(task_id.to_string(), result.clone());
                // put it back so peers polling the same task still see it
                let producer = broker.producer().await?;
                producer.publish("", &queue, &delivery.payload).await?;
                Ok(result)
            }
            _ => Ok(pending),
        }
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
