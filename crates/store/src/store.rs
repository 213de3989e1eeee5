// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The branch-local store.
//!
//! One mutex guards all records; every mutation commits under it and
//! then persists the snapshot, so readers never observe a half-applied
//! change. `get_or_create` operations are atomic for the same reason.

use crate::records::{split_queues, AppRecord, BrokerRecord, InstanceRecord, InstanceSpec, QueueRecord};
use crate::snapshot::{self, SnapshotError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such {kind}: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("invalid concurrency: max {max} must be >= min {min} and both >= 1")]
    InvalidConcurrency { max: u32, min: u32 },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Inner {
    #[serde(default)]
    brokers: HashMap<String, BrokerRecord>,
    #[serde(default)]
    apps: HashMap<String, AppRecord>,
    #[serde(default)]
    queues: HashMap<String, QueueRecord>,
    #[serde(default)]
    instances: HashMap<String, InstanceRecord>,
}

/// Key-addressable store for the records owned by this branch.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
    path: Option<PathBuf>,
    default_broker_url: String,
}

impl Store {
    /// Open a persisted store, loading the snapshot when present.
    pub fn open(path: PathBuf, default_broker_url: impl Into<String>) -> Result<Self, StoreError> {
        let inner = snapshot::load::<Inner>(&path)?.unwrap_or_default();
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            path: Some(path),
            default_broker_url: default_broker_url.into(),
        })
    }

    /// An unpersisted store for tests and offline tooling.
    pub fn in_memory(default_broker_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            path: None,
            default_broker_url: default_broker_url.into(),
        }
    }

    pub fn default_broker_url(&self) -> &str {
        &self.default_broker_url
    }

    fn commit(&self, inner: &Inner) {
        if let Some(path) = &self.path {
            if let Err(err) = snapshot::save(path, inner) {
                warn!(path = %path.display(), error = %err, "failed to persist store snapshot");
            }
        }
    }

    // ----- brokers -------------------------------------------------------

    pub fn brokers(&self) -> Vec<BrokerRecord> {
        self.inner.lock().brokers.values().cloned().collect()
    }

    pub fn broker_get_or_create(&self, url: impl Into<String>) -> BrokerRecord {
        let url = url.into();
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.brokers.get(&url) {
            return existing.clone();
        }
        let record = BrokerRecord { url: url.clone() };
        inner.brokers.insert(url, record.clone());
        self.commit(&inner);
        record
    }

    /// Record for the process-wide default broker URL.
    pub fn broker_default(&self) -> BrokerRecord {
        self.broker_get_or_create(self.default_broker_url.clone())
    }

    // ----- apps ----------------------------------------------------------

    pub fn apps(&self) -> Vec<AppRecord> {
        self.inner.lock().apps.values().cloned().collect()
    }

    pub fn app_get(&self, name: &str) -> Option<AppRecord> {
        self.inner.lock().apps.get(name).cloned()
    }

    /// Idempotent add: an existing app with the same name wins.
    pub fn app_add(
        &self,
        name: &str,
        broker: Option<String>,
        arguments: Option<String>,
        extra_config: Option<String>,
    ) -> AppRecord {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.apps.get(name) {
            return existing.clone();
        }
        if let Some(url) = &broker {
            inner
                .brokers
                .entry(url.clone())
                .or_insert_with(|| BrokerRecord { url: url.clone() });
        }
        let record = AppRecord { name: name.to_string(), broker, arguments, extra_config };
        inner.apps.insert(record.name.clone(), record.clone());
        self.commit(&inner);
        record
    }

    /// The designated default application, created on first use.
    pub fn app_default(&self) -> AppRecord {
        self.app_add(drover_core::config::DEFAULT_APP, None, None, None)
    }

    /// Rebuild an app from a peer's description (used by the App actor's
    /// scatter-on-miss cache).
    pub fn app_recreate(&self, record: &AppRecord) -> AppRecord {
        self.app_add(
            &record.name,
            record.broker.clone(),
            record.arguments.clone(),
            record.extra_config.clone(),
        )
    }

    pub fn app_save(&self, record: AppRecord) {
        let mut inner = self.inner.lock();
        inner.apps.insert(record.name.clone(), record);
        self.commit(&inner);
    }

    pub fn app_delete(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.apps.remove(name).is_some();
        if removed {
            self.commit(&inner);
        }
        removed
    }

    /// The broker an app's instances talk to.
    pub fn app_broker_url(&self, app: &AppRecord) -> String {
        app.broker.clone().unwrap_or_else(|| self.default_broker_url.clone())
    }

    // ----- queues --------------------------------------------------------

    pub fn queues(&self) -> Vec<QueueRecord> {
        self.inner.lock().queues.values().cloned().collect()
    }

    pub fn queue_get(&self, name: &str) -> Option<QueueRecord> {
        self.inner.lock().queues.get(name).cloned()
    }

    /// Idempotent queue declaration; extra options serialize into the
    /// options column.
    pub fn queue_add(
        &self,
        name: &str,
        exchange: Option<String>,
        exchange_type: Option<String>,
        routing_key: Option<String>,
        options: Option<Map<String, Value>>,
    ) -> QueueRecord {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.queues.get(name) {
            return existing.clone();
        }
        let options = options
            .filter(|m| !m.is_empty())
            .map(|m| Value::Object(m).to_string());
        let record = QueueRecord {
            name: name.to_string(),
            exchange,
            exchange_type,
            routing_key,
            options,
            is_enabled: true,
            created_at: Utc::now(),
        };
        inner.queues.insert(record.name.clone(), record.clone());
        self.commit(&inner);
        record
    }

    pub fn queue_save(&self, record: QueueRecord) {
        let mut inner = self.inner.lock();
        inner.queues.insert(record.name.clone(), record);
        self.commit(&inner);
    }

    pub fn queue_delete(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.queues.remove(name).is_some();
        if removed {
            self.commit(&inner);
        }
        removed
    }

    // ----- instances -----------------------------------------------------

    pub fn instances(&self) -> Vec<InstanceRecord> {
        self.inner.lock().instances.values().cloned().collect()
    }

    pub fn instances_for_app(&self, app: &str) -> Vec<InstanceRecord> {
        self.inner.lock().instances.values().filter(|i| i.app == app).cloned().collect()
    }

    pub fn instance_get(&self, name: &str) -> Option<InstanceRecord> {
        self.inner.lock().instances.get(name).cloned()
    }

    /// Create an instance from a spec. Missing name gets a uuid, missing
    /// app resolves to the default app (created on demand).
    pub fn instance_add(&self, spec: InstanceSpec) -> Result<InstanceRecord, StoreError> {
        if spec.min_concurrency < 1 || spec.max_concurrency < spec.min_concurrency {
            return Err(StoreError::InvalidConcurrency {
                max: spec.max_concurrency,
                min: spec.min_concurrency,
            });
        }
        let app_name =
            spec.app.clone().unwrap_or_else(|| drover_core::config::DEFAULT_APP.to_string());
        // ensure the app exists (get_or_create, never check-then-insert)
        self.app_add(&app_name, None, None, None);
        if let Some(url) = &spec.broker {
            self.broker_get_or_create(url.clone());
        }

        let record = InstanceRecord {
            name: spec.name.unwrap_or_else(drover_core::uuid),
            app: app_name,
            queues: spec.queues.as_deref().map(split_queues).unwrap_or_default(),
            max_concurrency: spec.max_concurrency,
            min_concurrency: spec.min_concurrency,
            pool: spec.pool,
            is_enabled: true,
            created_at: Utc::now(),
            broker: spec.broker,
            arguments: spec.arguments,
            extra_config: spec.extra_config,
        };
        let mut inner = self.inner.lock();
        if inner.instances.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists { kind: "instance", name: record.name });
        }
        inner.instances.insert(record.name.clone(), record.clone());
        self.commit(&inner);
        Ok(record)
    }

    pub fn instance_save(&self, record: InstanceRecord) {
        let mut inner = self.inner.lock();
        inner.instances.insert(record.name.clone(), record);
        self.commit(&inner);
    }

    /// Delete the record, returning it for the caller to shut down.
    pub fn instance_remove(&self, name: &str) -> Option<InstanceRecord> {
        let mut inner = self.inner.lock();
        let removed = inner.instances.remove(name);
        if removed.is_some() {
            self.commit(&inner);
        }
        removed
    }

    pub fn instance_enable(&self, name: &str) -> Result<InstanceRecord, StoreError> {
        self.instance_update(name, |record| record.is_enabled = true)
    }

    pub fn instance_disable(&self, name: &str) -> Result<InstanceRecord, StoreError> {
        self.instance_update(name, |record| record.is_enabled = false)
    }

    /// Add a queue name to the instance's declared set (model only).
    pub fn instance_add_queue(&self, name: &str, queue: &str) -> Result<InstanceRecord, StoreError> {
        let queue = queue.to_string();
        self.instance_update(name, move |record| {
            record.queues.insert(queue.clone());
        })
    }

    /// Update the stored autoscale pair; `None` leaves a bound untouched.
    pub fn instance_set_autoscale(
        &self,
        name: &str,
        max: Option<u32>,
        min: Option<u32>,
    ) -> Result<InstanceRecord, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner.instances.get_mut(name).ok_or_else(|| StoreError::NotFound {
            kind: "instance",
            name: name.to_string(),
        })?;
        let new_max = max.unwrap_or(record.max_concurrency);
        let new_min = min.unwrap_or(record.min_concurrency);
        if new_min < 1 || new_max < new_min {
            return Err(StoreError::InvalidConcurrency { max: new_max, min: new_min });
        }
        record.max_concurrency = new_max;
        record.min_concurrency = new_min;
        let updated = record.clone();
        self.commit(&inner);
        Ok(updated)
    }

    /// Remove `queue` from every matching instance's declared set,
    /// returning the instances that actually changed.
    pub fn remove_queue_from_instances(
        &self,
        queue: &str,
        name: Option<&str>,
    ) -> Vec<InstanceRecord> {
        let mut inner = self.inner.lock();
        let mut changed = Vec::new();
        for record in inner.instances.values_mut() {
            if name.is_some_and(|n| n != record.name) {
                continue;
            }
            if record.queues.remove(queue) {
                changed.push(record.clone());
            }
        }
        if !changed.is_empty() {
            self.commit(&inner);
        }
        changed
    }

    /// Resolve the broker an instance talks to: instance override, then
    /// app broker, then the process default.
    pub fn broker_url_for(&self, instance: &InstanceRecord) -> String {
        if let Some(url) = &instance.broker {
            return url.clone();
        }
        let inner = self.inner.lock();
        inner
            .apps
            .get(&instance.app)
            .and_then(|app| app.broker.clone())
            .unwrap_or_else(|| self.default_broker_url.clone())
    }

    fn instance_update(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut InstanceRecord),
    ) -> Result<InstanceRecord, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner.instances.get_mut(name).ok_or_else(|| StoreError::NotFound {
            kind: "instance",
            name: name.to_string(),
        })?;
        mutate(record);
        let updated = record.clone();
        self.commit(&inner);
        Ok(updated)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
