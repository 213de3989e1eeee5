// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The local instance manager.
//!
//! Preferred API for mutating instances on this branch: every call
//! commits to the model store and enqueues the matching supervisor
//! action. Sync mode blocks on the completion handle, so the caller
//! returns only after the supervisor has reconciled the change.

use crate::supervisor::{Completion, Supervise};
use drover_store::{InstanceRecord, InstanceSpec, Store, StoreError};
use std::sync::Arc;

pub struct LocalInstanceManager {
    store: Store,
    supervisor: Arc<dyn Supervise>,
}

impl LocalInstanceManager {
    pub fn new(store: Store, supervisor: Arc<dyn Supervise>) -> Self {
        Self { store, supervisor }
    }

    pub fn get(&self, name: &str) -> Result<InstanceRecord, StoreError> {
        self.store
            .instance_get(name)
            .ok_or_else(|| StoreError::NotFound { kind: "instance", name: name.to_string() })
    }

    /// Create the record and have the supervisor bring the worker up.
    pub async fn add(&self, spec: InstanceSpec, nowait: bool) -> Result<InstanceRecord, StoreError> {
        if let Some(url) = &spec.broker {
            self.store.broker_get_or_create(url.clone());
        }
        let record = self.store.instance_add(spec)?;
        self.maybe_wait(self.supervisor.verify(vec![record.clone()], false), nowait).await;
        Ok(record)
    }

    /// Delete the record, then have the supervisor stop the worker.
    pub async fn remove(&self, name: &str, nowait: bool) -> Result<InstanceRecord, StoreError> {
        let record = self
            .store
            .instance_remove(name)
            .ok_or_else(|| StoreError::NotFound { kind: "instance", name: name.to_string() })?;
        self.maybe_wait(self.supervisor.shutdown(vec![record.clone()]), nowait).await;
        Ok(record)
    }

    pub async fn restart(&self, name: &str, nowait: bool) -> Result<InstanceRecord, StoreError> {
        let record = self.get(name)?;
        self.maybe_wait(self.supervisor.restart(vec![record.clone()]), nowait).await;
        Ok(record)
    }

    pub async fn enable(&self, name: &str, nowait: bool) -> Result<InstanceRecord, StoreError> {
        let record = self.store.instance_enable(name)?;
        self.maybe_wait(self.supervisor.verify(vec![record.clone()], false), nowait).await;
        Ok(record)
    }

    pub async fn disable(&self, name: &str, nowait: bool) -> Result<InstanceRecord, StoreError> {
        let record = self.store.instance_disable(name)?;
        self.maybe_wait(self.supervisor.verify(vec![record.clone()], false), nowait).await;
        Ok(record)
    }

    /// Declare a consumer on the record; the verify makes it real.
    pub async fn add_consumer(
        &self,
        name: &str,
        queue: &str,
        nowait: bool,
    ) -> Result<InstanceRecord, StoreError> {
        let record = self.store.instance_add_queue(name, queue)?;
        self.maybe_wait(self.supervisor.verify(vec![record.clone()], false), nowait).await;
        Ok(record)
    }

    /// Remove a consumer from the record; the verify cancels it.
    pub async fn cancel_consumer(
        &self,
        name: &str,
        queue: &str,
        nowait: bool,
    ) -> Result<Vec<InstanceRecord>, StoreError> {
        let changed = self.store.remove_queue_from_instances(queue, Some(name));
        self.maybe_wait(self.supervisor.verify(changed.clone(), false), nowait).await;
        Ok(changed)
    }

    /// Remove a queue from every instance on this branch.
    pub async fn remove_queue(&self, queue: &str, nowait: bool) -> Vec<InstanceRecord> {
        let changed = self.store.remove_queue_from_instances(queue, None);
        self.maybe_wait(self.supervisor.verify(changed.clone(), false), nowait).await;
        changed
    }

    async fn maybe_wait(&self, completion: Arc<Completion>, nowait: bool) {
        if !nowait {
            completion.wait().await;
        }
    }
}

#[cfg(test)]
#[path = "managers_tests.rs"]
mod tests;
