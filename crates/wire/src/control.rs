// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker control protocol payloads.
//!
//! Commands are broadcast on the control exchange, optionally restricted
//! to a destination list of instance names; workers answer on a reply
//! queue with their name attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A broadcast control command (`ping`, `stats`, `active_queues`,
/// `add_consumer`, `cancel_consumer`, `autoscale`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
    /// Instance names that should handle this; `None` means everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Vec<String>>,
    /// Reply queue; absent when no reply is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub correlation_id: String,
}

impl ControlRequest {
    /// Whether `instance` is addressed by this request.
    pub fn addressed_to(&self, instance: &str) -> bool {
        match &self.destination {
            Some(names) => names.iter().any(|n| n == instance),
            None => true,
        }
    }
}

/// A single worker's answer to a control command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlReply {
    /// Name of the replying instance.
    pub instance: String,
    pub correlation_id: String,
    pub payload: Value,
}

/// The stats block a worker reports, as far as the supervisor cares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerStats>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Autoscaler section of a worker stats report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AutoscalerStats {
    pub max: u32,
    pub min: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
}

/// One entry of an `active_queues` report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveQueue {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

/// Arguments of an `add_consumer` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerSpec {
    pub queue: String,
    pub exchange: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<String>,
    pub routing_key: String,
    /// Extra consumer options carried through from the queue record.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
