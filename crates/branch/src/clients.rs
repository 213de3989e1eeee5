// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-side handles to the fleet actors.
//!
//! These wrap the raw actor clients with the local-first semantics the
//! HTTP layer relies on: app lookups hit the local store and a cache
//! before scattering, queue lookups try the local store before routing
//! to the owner, and instance mutations route to whichever branch
//! advertises the name.

use async_trait::async_trait;
use drover_actors::{ActorClient, ActorSpec, DispatchError, DispatchType, RoutingTable};
use drover_adapters::{LookupError, QueueDirectory};
use drover_broker::Broker;
use drover_store::{AppRecord, InstanceSpec, QueueRecord, Store};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub fn branch_spec() -> ActorSpec {
    ActorSpec::new(
        "Branch",
        vec![DispatchType::Direct, DispatchType::Scatter, DispatchType::RoundRobin],
    )
    .with_timeout(Duration::from_secs(60))
    .with_meta_section("this")
}

pub fn app_spec() -> ActorSpec {
    ActorSpec::new("App", vec![DispatchType::Scatter])
}

pub fn instance_spec() -> ActorSpec {
    ActorSpec::new(
        "Instance",
        vec![DispatchType::Direct, DispatchType::Scatter, DispatchType::RoundRobin],
    )
    .with_timeout(Duration::from_secs(60))
    .with_meta_section("instances")
}

pub fn queue_spec() -> ActorSpec {
    ActorSpec::new(
        "Queue",
        vec![DispatchType::Direct, DispatchType::Scatter, DispatchType::RoundRobin],
    )
    .with_meta_section("queues")
}

/// Merge scattered `Vec<String>` replies, deduplicated.
fn flatten_names(values: Vec<Value>) -> Vec<String> {
    let mut names: Vec<String> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .flatten()
        .collect();
    names.sort();
    names.dedup();
    names
}

/// One handle per concrete actor, sharing the default broker.
#[derive(Clone)]
pub struct FleetClients {
    pub branches: BranchClient,
    pub apps: AppClient,
    pub instances: InstanceClient,
    pub queues: QueueClient,
}

impl FleetClients {
    pub fn new(
        broker: Arc<Broker>,
        sender: &str,
        router: Arc<RoutingTable>,
        store: Store,
    ) -> Self {
        let client = |spec: ActorSpec| {
            ActorClient::new(spec, Arc::clone(&broker), sender, Arc::clone(&router))
        };
        Self {
            branches: BranchClient { client: client(branch_spec()) },
            apps: AppClient {
                client: client(app_spec()),
                store: store.clone(),
                cache: Arc::new(Mutex::new(HashMap::new())),
            },
            instances: InstanceClient { client: client(instance_spec()) },
            queues: QueueClient { client: client(queue_spec()), store },
        }
    }
}

#[derive(Clone)]
pub struct BranchClient {
    client: ActorClient,
}

impl BranchClient {
    /// Ids of every reachable branch.
    pub async fn all(&self) -> Result<Vec<String>, DispatchError> {
        let mut ids: Vec<String> = self
            .client
            .scatter("id", json!({}), None, None, false)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Describe one branch.
    pub async fn get(&self, id: &str) -> Result<Value, DispatchError> {
        self.client.send_to_able(id, "about", json!({}), None).await
    }

    pub async fn urls(&self) -> Result<Vec<Value>, DispatchError> {
        self.client.scatter("url", json!({}), None, None, false).await
    }

    /// Ask one branch to shut down (fire-and-forget).
    pub async fn shutdown(&self, id: &str) -> Result<(), DispatchError> {
        self.client.cast_to_able(id, "shutdown", json!({ "id": id })).await
    }

    pub async fn shutdown_all(&self) -> Result<(), DispatchError> {
        self.client.scatter_cast("shutdown", json!({ "id": "*" })).await
    }
}

#[derive(Clone)]
pub struct AppClient {
    client: ActorClient,
    store: Store,
    cache: Arc<Mutex<HashMap<String, AppRecord>>>,
}

impl AppClient {
    pub async fn all(&self) -> Result<Vec<String>, DispatchError> {
        Ok(flatten_names(self.client.scatter("all", json!({}), None, None, false).await?))
    }

    /// Idempotent add: applied locally and scattered to peers.
    pub async fn add(
        &self,
        name: &str,
        broker: Option<String>,
        arguments: Option<String>,
        extra_config: Option<String>,
    ) -> Result<Value, DispatchError> {
        let args = json!({
            "name": name,
            "broker": &broker,
            "arguments": &arguments,
            "extra_config": &extra_config,
        });
        self.client.scatter_cast("add", args).await?;
        let record = self.store.app_add(name, broker, arguments, extra_config);
        Ok(app_json(&self.store, &record))
    }

    pub async fn delete(&self, name: &str) -> Result<Vec<Value>, DispatchError> {
        self.cache.lock().remove(name);
        self.client.scatter("delete", json!({ "name": name }), None, None, false).await
    }

    pub async fn metrics(&self) -> Result<Vec<Value>, DispatchError> {
        self.client.scatter("metrics", json!({}), None, None, false).await
    }

    /// Resolve an app: default app for `None`, then cache, then local
    /// store, then a scatter to whoever has it.
    pub async fn get(&self, name: Option<&str>) -> Result<AppRecord, DispatchError> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(self.store.app_default());
        };
        if let Some(cached) = self.cache.lock().get(name) {
            return Ok(cached.clone());
        }
        if let Some(local) = self.store.app_get(name) {
            return Ok(local);
        }
        let found = self
            .client
            .scatter("get", json!({ "name": name }), None, Some(1), false)
            .await?;
        let Some(first) = found.into_iter().next() else {
            return Err(DispatchError::NoRoute(name.to_string()));
        };
        let record: AppRecord = serde_json::from_value(first)?;
        let record = self.store.app_recreate(&record);
        self.cache.lock().insert(name.to_string(), record.clone());
        Ok(record)
    }
}

#[derive(Clone)]
pub struct InstanceClient {
    client: ActorClient,
}

impl InstanceClient {
    pub async fn all(&self, app: Option<&str>) -> Result<Vec<String>, DispatchError> {
        let values =
            self.client.scatter("all", json!({ "app": app }), None, None, false).await?;
        Ok(flatten_names(values))
    }

    pub async fn get(&self, name: &str) -> Result<Value, DispatchError> {
        self.client.send_to_able(name, "get", json!({ "name": name }), None).await
    }

    /// Create an instance somewhere in the fleet (round-robin). With
    /// `nowait` the name is generated client-side and the reply skipped.
    pub async fn add(&self, mut spec: InstanceSpec, nowait: bool) -> Result<Value, DispatchError> {
        if nowait {
            let name = spec.name.clone().unwrap_or_else(drover_core::uuid);
            spec.name = Some(name.clone());
            self.client.throw_cast("add", serde_json::to_value(&spec)?).await?;
            return Ok(json!({ "name": name }));
        }
        self.client.throw("add", serde_json::to_value(&spec)?, None).await
    }

    pub async fn remove(&self, name: &str, nowait: bool) -> Result<Value, DispatchError> {
        self.route("remove", name, json!({ "name": name }), nowait).await
    }

    pub async fn restart(&self, name: &str, nowait: bool) -> Result<Value, DispatchError> {
        self.route("restart", name, json!({ "name": name }), nowait).await
    }

    pub async fn enable(&self, name: &str, nowait: bool) -> Result<Value, DispatchError> {
        self.route("enable", name, json!({ "name": name }), nowait).await
    }

    pub async fn disable(&self, name: &str, nowait: bool) -> Result<Value, DispatchError> {
        self.route("disable", name, json!({ "name": name }), nowait).await
    }

    pub async fn add_consumer(
        &self,
        name: &str,
        queue: &str,
        nowait: bool,
    ) -> Result<Value, DispatchError> {
        self.route("add_consumer", name, json!({ "name": name, "queue": queue }), nowait).await
    }

    pub async fn cancel_consumer(
        &self,
        name: &str,
        queue: &str,
        nowait: bool,
    ) -> Result<Value, DispatchError> {
        self.route("cancel_consumer", name, json!({ "name": name, "queue": queue }), nowait).await
    }

    /// Scatter a queue removal to every branch; returns the names of
    /// the instances that were mutated.
    pub async fn remove_queue_from_all(
        &self,
        queue: &str,
        nowait: bool,
    ) -> Result<Vec<String>, DispatchError> {
        if nowait {
            self.client.scatter_cast("remove_queue_from_all", json!({ "queue": queue })).await?;
            return Ok(Vec::new());
        }
        let values = self
            .client
            .scatter("remove_queue_from_all", json!({ "queue": queue }), None, None, false)
            .await?;
        Ok(flatten_names(values))
    }

    pub async fn autoscale(
        &self,
        name: &str,
        max: Option<u32>,
        min: Option<u32>,
    ) -> Result<Value, DispatchError> {
        self.client
            .send_to_able(name, "autoscale", json!({ "name": name, "max": max, "min": min }), None)
            .await
    }

    pub async fn consuming_from(&self, name: &str) -> Result<Value, DispatchError> {
        self.client.send_to_able(name, "consuming_from", json!({ "name": name }), None).await
    }

    pub async fn stats(&self, name: &str) -> Result<Value, DispatchError> {
        self.client.send_to_able(name, "stats", json!({ "name": name }), None).await
    }

    async fn route(
        &self,
        method: &str,
        name: &str,
        args: Value,
        nowait: bool,
    ) -> Result<Value, DispatchError> {
        if nowait {
            self.client.cast_to_able(name, method, args).await?;
            return Ok(json!({ "ok": "operation scheduled" }));
        }
        self.client.send_to_able(name, method, args, None).await
    }
}

#[derive(Clone)]
pub struct QueueClient {
    client: ActorClient,
    store: Store,
}

impl QueueClient {
    pub async fn all(&self) -> Result<Vec<String>, DispatchError> {
        Ok(flatten_names(self.client.scatter("all", json!({}), None, None, false).await?))
    }

    /// Local store first, then the owning branch.
    pub async fn get(&self, name: &str) -> Result<Value, DispatchError> {
        if let Some(record) = self.store.queue_get(name) {
            return Ok(queue_json(&record));
        }
        self.client.send_to_able(name, "get", json!({ "name": name }), None).await
    }

    pub async fn get_record(&self, name: &str) -> Result<QueueRecord, DispatchError> {
        let value = self.get(name).await?;
        Ok(serde_json::from_value(wire_to_record(value))?)
    }

    pub async fn add(
        &self,
        name: &str,
        exchange: Option<String>,
        exchange_type: Option<String>,
        routing_key: Option<String>,
        options: Option<Map<String, Value>>,
        nowait: bool,
    ) -> Result<Value, DispatchError> {
        let args = json!({
            "name": name,
            "exchange": exchange,
            "exchange_type": exchange_type,
            "routing_key": routing_key,
            "options": options,
        });
        if nowait {
            self.client.throw_cast("add", args).await?;
            return Ok(json!({ "ok": "operation scheduled" }));
        }
        self.client.throw("add", args, None).await
    }

    /// Delete a queue declaration: first every branch drops it from its
    /// instances, then the owner deletes the record.
    pub async fn delete(
        &self,
        name: &str,
        instances: &InstanceClient,
    ) -> Result<Value, DispatchError> {
        instances.remove_queue_from_all(name, true).await?;
        match self.client.send_to_able(name, "delete", json!({ "name": name }), None).await {
            // locally-declared queue whose announcement has not landed yet
            Err(DispatchError::NoRoute(_)) if self.store.queue_get(name).is_some() => {
                self.store.queue_delete(name);
                Ok(json!("ok"))
            }
            outcome => outcome,
        }
    }
}

/// The wire shape omits `is_enabled`/`created_at`; fill defaults so a
/// peer's answer deserializes into a record.
fn wire_to_record(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.entry("is_enabled").or_insert(json!(true));
        map.entry("created_at").or_insert_with(|| json!(chrono::Utc::now()));
    }
    value
}

/// Queue descriptor as served over the wire.
pub(crate) fn queue_json(record: &QueueRecord) -> Value {
    json!({
        "name": record.name,
        "exchange": record.exchange,
        "exchange_type": record.exchange_type,
        "routing_key": record.routing_key,
        "options": record.options,
    })
}

/// App descriptor as served over the wire, broker resolved.
pub(crate) fn app_json(store: &Store, record: &AppRecord) -> Value {
    json!({
        "name": record.name,
        "broker": store.app_broker_url(record),
        "arguments": record.arguments,
        "extra_config": record.extra_config,
    })
}

/// Queue directory backed by the local store and the Queue actor.
pub struct ActorQueueDirectory {
    store: Store,
    queues: QueueClient,
}

impl ActorQueueDirectory {
    pub fn new(store: Store, queues: QueueClient) -> Self {
        Self { store, queues }
    }
}

#[async_trait]
impl QueueDirectory for ActorQueueDirectory {
    async fn lookup(&self, name: &str) -> Result<QueueRecord, LookupError> {
        if let Some(record) = self.store.queue_get(name) {
            return Ok(record);
        }
        match self.queues.get_record(name).await {
            Ok(record) => Ok(record),
            Err(DispatchError::NoRoute(_)) => Err(LookupError::NoRoute(name.to_string())),
            Err(err) => Err(LookupError::Failed(err.to_string())),
        }
    }
}
