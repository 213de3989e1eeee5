// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor RPC envelope and reply bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A method call addressed to an actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Handler method name, e.g. `"add_consumer"`.
    pub method: String,
    /// Method arguments as a JSON object.
    #[serde(default)]
    pub args: Value,
    /// Reply queue; absent for casts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub correlation_id: String,
    /// Name of the target actor (`"Branch"`, `"App"`, ...).
    pub actor: String,
    /// Branch that sent the message.
    pub sender: String,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Fetch a string argument by key.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// Outcome of a handler, as sent back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReplyBody {
    /// Successful result.
    Ok { ok: Value },
    /// Handler failed: `[repr, trace]`, surfaced verbatim to HTTP 500.
    Nok { nok: (String, String) },
    /// Handler yielded; the caller should try the next peer.
    Next { next: bool },
}

impl ReplyBody {
    pub fn ok(value: Value) -> Self {
        ReplyBody::Ok { ok: value }
    }

    pub fn nok(repr: impl Into<String>, trace: impl Into<String>) -> Self {
        ReplyBody::Nok { nok: (repr.into(), trace.into()) }
    }

    pub fn next() -> Self {
        ReplyBody::Next { next: true }
    }
}

/// A correlated reply on a reply queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub correlation_id: String,
    /// Branch that produced the reply.
    pub sender: String,
    #[serde(flatten)]
    pub body: ReplyBody,
}

impl Reply {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
