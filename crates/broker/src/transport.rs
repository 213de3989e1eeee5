// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The transport contract every broker backend implements.
//!
//! The contract is deliberately narrow: declare exchanges and queues,
//! bind, publish, and consume. Everything above (actors, control
//! commands, presence) is expressed in these terms so the in-memory
//! backend can stand in for AMQP in tests.

use crate::error::BrokerError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exchange routing behavior. Only the kinds the control plane uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Route to queues bound with a matching routing key.
    Direct,
    /// Route to every bound queue.
    Fanout,
}

/// One message delivered to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// A consumer attached to one queue.
///
/// Messages are acknowledged on delivery (at-most-once), matching the
/// actor layer's delivery assumption.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { rx }
    }

    /// Wait for the next delivery; `None` when the queue is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    /// Open a connection to the broker at `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, BrokerError>;
}

#[async_trait]
pub trait Connection: std::fmt::Debug + Send + Sync {
    fn is_open(&self) -> bool;

    /// Open a lightweight publisher on this connection.
    async fn producer(&self) -> Result<Box<dyn Producer>, BrokerError>;

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declare a queue. Exclusive queues are deleted when the declaring
    /// connection goes away.
    async fn declare_queue(&self, queue: &str, exclusive: bool) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str) -> Result<Subscription, BrokerError>;

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Producer: std::fmt::Debug + Send + Sync {
    /// Publish to `exchange` with `routing_key`. The empty exchange
    /// routes straight to the queue named by the routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}
