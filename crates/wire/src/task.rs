// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook task messages and result polling types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A webhook dispatch task published onto a queue for a worker to run.
///
/// The task body simply forwards the original request; no semantics are
/// attached to the query string or the response payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookTask {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// What the HTTP layer returns after enqueueing a webhook task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskReceipt {
    pub uuid: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub method: String,
    pub params: HashMap<String, String>,
    pub data: HashMap<String, String>,
    pub broker: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskState::Pending => "PENDING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        })
    }
}

/// Result message published to the per-task result queue by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub id: String,
    pub state: TaskState,
    #[serde(default)]
    pub result: Value,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
