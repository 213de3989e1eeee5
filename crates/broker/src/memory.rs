// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory broker used by tests.
//!
//! Hubs are shared per URL in a process-global registry, so two branches
//! built on the same `mem://` URL talk to the same broker — this is what
//! makes cross-branch scenarios runnable without a live AMQP server. A
//! hub can be taken down and brought back to exercise outage handling.

use crate::error::BrokerError;
use crate::transport::{Connection, Delivery, ExchangeKind, Producer, Subscription, Transport};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

static HUBS: Lazy<Mutex<HashMap<String, Arc<Hub>>>> = Lazy::new(Mutex::default);

fn hub(url: &str) -> Arc<Hub> {
    let mut hubs = HUBS.lock();
    Arc::clone(hubs.entry(url.to_string()).or_insert_with(|| Arc::new(Hub::default())))
}

#[derive(Debug, Default)]
struct Hub {
    state: Mutex<HubState>,
}

#[derive(Debug, Default)]
struct HubState {
    down: bool,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    /// `(queue, routing_key)` pairs.
    bindings: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Queue {
    consumers: Vec<mpsc::UnboundedSender<Delivery>>,
    rr: usize,
    /// Messages waiting for the first consumer to attach.
    backlog: VecDeque<Delivery>,
}

impl Queue {
    /// Hand the delivery to one consumer (round-robin), pruning dead
    /// consumers along the way; park it when nobody listens.
    fn deliver(&mut self, delivery: Delivery) {
        while !self.consumers.is_empty() {
            let i = self.rr % self.consumers.len();
            match self.consumers[i].send(delivery.clone()) {
                Ok(()) => {
                    self.rr = i + 1;
                    return;
                }
                Err(_) => {
                    self.consumers.remove(i);
                }
            }
        }
        self.backlog.push_back(delivery);
    }
}

impl HubState {
    fn publish(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) {
        let delivery = Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        };
        if exchange.is_empty() {
            // default exchange: straight to the queue named by the key
            if let Some(queue) = self.queues.get_mut(routing_key) {
                queue.deliver(delivery);
            }
            return;
        }
        let Some(entry) = self.exchanges.get(exchange) else { return };
        let targets: Vec<String> = match entry.kind {
            ExchangeKind::Fanout => entry.bindings.iter().map(|(q, _)| q.clone()).collect(),
            ExchangeKind::Direct => entry
                .bindings
                .iter()
                .filter(|(_, key)| key == routing_key)
                .map(|(q, _)| q.clone())
                .collect(),
        };
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.deliver(delivery.clone());
            }
        }
    }
}

/// Transport backed by process-local hubs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTransport;

impl MemoryTransport {
    /// A fresh unique `mem://` URL, giving each test an isolated hub.
    pub fn unique_url() -> String {
        format!("mem://{}", drover_core::uuid())
    }

    /// Simulate a broker outage (or recovery) for every connection on
    /// this URL.
    pub fn set_down(url: &str, down: bool) {
        hub(url).state.lock().down = down;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        let hub = hub(url);
        if hub.state.lock().down {
            return Err(BrokerError::Connection(format!("{url}: broker is down")));
        }
        Ok(Arc::new(MemoryConnection { hub }))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    hub: Arc<Hub>,
}

impl MemoryConnection {
    fn guard(&self) -> Result<(), BrokerError> {
        if self.hub.state.lock().down {
            return Err(BrokerError::Connection("broker is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_open(&self) -> bool {
        !self.hub.state.lock().down
    }

    async fn producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        self.guard()?;
        Ok(Box::new(MemoryProducer { hub: Arc::clone(&self.hub) }))
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.guard()?;
        let mut state = self.hub.state.lock();
        state
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| Exchange { kind, bindings: Vec::new() });
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, _exclusive: bool) -> Result<(), BrokerError> {
        self.guard()?;
        let mut state = self.hub.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.guard()?;
        let mut state = self.hub.state.lock();
        let entry = state.exchanges.get_mut(exchange).ok_or_else(|| {
            BrokerError::Connection(format!("bind to undeclared exchange {exchange}"))
        })?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !entry.bindings.contains(&binding) {
            entry.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError> {
        self.guard()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.hub.state.lock();
        let entry = state.queues.entry(queue.to_string()).or_default();
        while let Some(parked) = entry.backlog.pop_front() {
            let _ = tx.send(parked);
        }
        entry.consumers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock();
        state.queues.remove(queue);
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|(q, _)| q != queue);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryProducer {
    hub: Arc<Hub>,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock();
        if state.down {
            return Err(BrokerError::Connection("broker is down".to_string()));
        }
        state.publish(exchange, routing_key, payload);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.hub.state.lock().down
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
