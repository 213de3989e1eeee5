// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A broker connection target, unique by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerRecord {
    pub url: String,
}

/// A named application grouping instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppRecord {
    pub name: String,
    /// Broker URL override; `None` falls back to the process default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    /// Free-text default worker arguments, shell-split when used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_config: Option<String>,
}

impl AppRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), broker: None, arguments: None, extra_config: None }
    }
}

/// A message routing descriptor instances can consume from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Extra consumer options as a JSON object string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exchange: None,
            exchange_type: None,
            routing_key: None,
            options: None,
            is_enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Parse the options column. Malformed JSON is reported as a warning
    /// and treated as no options.
    pub fn options_map(&self) -> Map<String, Value> {
        let Some(raw) = self.options.as_deref().filter(|s| !s.is_empty()) else {
            return Map::new();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(queue = %self.name, options = %other, "queue options is not an object");
                Map::new()
            }
            Err(err) => {
                warn!(queue = %self.name, error = %err, "unparsable queue options");
                Map::new()
            }
        }
    }
}

/// A declared worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: String,
    /// Owning app by name; always set (defaults to the standard app).
    pub app: String,
    /// Declared consumer queue names; order-insensitive, duplicates
    /// suppressed, serialized as a comma-joined string.
    #[serde(with = "comma_set")]
    pub queues: BTreeSet<String>,
    pub max_concurrency: u32,
    pub min_concurrency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Broker URL override; `None` falls back to the app's broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_config: Option<String>,
}

impl InstanceRecord {
    /// The always-on queue addressed to exactly this instance.
    pub fn direct_queue(&self) -> String {
        format!("dq.{}", self.name)
    }

    /// Per-instance working directory under `root`, created on first
    /// access and never deleted by the core.
    pub fn work_dir(&self, root: &Path) -> io::Result<PathBuf> {
        let dir = root.join(&self.name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn pidfile(&self, root: &Path) -> PathBuf {
        root.join(&self.name).join("worker.pid")
    }

    pub fn logfile(&self, root: &Path) -> PathBuf {
        root.join(&self.name).join("worker.log")
    }

    pub fn statedb(&self, root: &Path) -> PathBuf {
        root.join(&self.name).join("worker.statedb")
    }
}

/// Parameters for creating an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Instance name; a uuid is generated when omitted.
    #[serde(default)]
    pub name: Option<String>,
    /// App name; the default app when omitted.
    #[serde(default)]
    pub app: Option<String>,
    /// Comma string or implicit empty set of queue names.
    #[serde(default)]
    pub queues: Option<String>,
    #[serde(default = "one")]
    pub max_concurrency: u32,
    #[serde(default = "one")]
    pub min_concurrency: u32,
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub extra_config: Option<String>,
}

fn one() -> u32 {
    1
}

/// Serialize a queue-name set as `"a,b,c"`.
mod comma_set {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeSet;

    pub fn serialize<S: Serializer>(set: &BTreeSet<String>, ser: S) -> Result<S::Ok, S::Error> {
        let joined = set.iter().cloned().collect::<Vec<_>>().join(",");
        ser.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeSet<String>, D::Error> {
        let raw = String::deserialize(de)?;
        Ok(super::split_queues(&raw))
    }
}

/// Split a comma-joined queue list, dropping empties and duplicates.
pub(crate) fn split_queues(raw: &str) -> BTreeSet<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
