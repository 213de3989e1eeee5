// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded connection and producer pools, one pair per broker URL.

use crate::error::BrokerError;
use crate::transport::{Connection, Producer, Transport};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CONNECTION_POOL_SIZE: usize = 10;
const PRODUCER_POOL_SIZE: usize = 100;

/// Pool manager for broker connections.
#[derive(Debug)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    url: String,
}

#[async_trait]
impl Manager for ConnectionManager {
    type Type = Arc<dyn Connection>;
    type Error = BrokerError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.transport.connect(&self.url).await
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        if conn.is_open() {
            Ok(())
        } else {
            Err(RecycleError::StaticMessage("connection closed"))
        }
    }
}

/// Pool manager for producers, multiplexed over one cached connection.
pub struct ProducerManager {
    transport: Arc<dyn Transport>,
    url: String,
    conn: tokio::sync::Mutex<Option<Arc<dyn Connection>>>,
}

impl ProducerManager {
    async fn connection(&self) -> Result<Arc<dyn Connection>, BrokerError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref().filter(|c| c.is_open()) {
            return Ok(Arc::clone(conn));
        }
        let fresh = self.transport.connect(&self.url).await?;
        *cached = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}

#[async_trait]
impl Manager for ProducerManager {
    type Type = Box<dyn Producer>;
    type Error = BrokerError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.connection().await?.producer().await
    }

    async fn recycle(
        &self,
        producer: &mut Self::Type,
        _metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        if producer.is_open() {
            Ok(())
        } else {
            Err(RecycleError::StaticMessage("producer channel closed"))
        }
    }
}

/// A producer checked out of the pool; released on drop.
pub type PooledProducer = Object<ProducerManager>;

/// A connection checked out of the pool; released on drop.
pub type PooledConnection = Object<ConnectionManager>;

/// Runtime handle to one broker URL: its pools, plus the transport that
/// made them.
pub struct Broker {
    url: String,
    connections: Pool<ConnectionManager>,
    producers: Pool<ProducerManager>,
    acquire_timeout: Duration,
}

impl Broker {
    pub fn new(
        transport: Arc<dyn Transport>,
        url: impl Into<String>,
        acquire_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let url = url.into();
        let connections = Pool::builder(ConnectionManager {
            transport: Arc::clone(&transport),
            url: url.clone(),
        })
        .max_size(CONNECTION_POOL_SIZE)
        .build()
        .map_err(|e| BrokerError::Pool(e.to_string()))?;
        let producers = Pool::builder(ProducerManager {
            transport,
            url: url.clone(),
            conn: tokio::sync::Mutex::new(None),
        })
        .max_size(PRODUCER_POOL_SIZE)
        .build()
        .map_err(|e| BrokerError::Pool(e.to_string()))?;
        Ok(Self { url, connections, producers, acquire_timeout })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connection(&self) -> Result<PooledConnection, BrokerError> {
        self.connections.get().await.map_err(flatten_pool_error)
    }

    /// Acquire a producer, blocking up to the configured timeout.
    pub async fn producer(&self) -> Result<PooledProducer, BrokerError> {
        match tokio::time::timeout(self.acquire_timeout, self.producers.get()).await {
            Ok(result) => result.map_err(flatten_pool_error),
            Err(_) => Err(BrokerError::AcquireTimeout),
        }
    }
}

fn flatten_pool_error(err: PoolError<BrokerError>) -> BrokerError {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => BrokerError::AcquireTimeout,
        other => BrokerError::Pool(other.to_string()),
    }
}

/// One `Broker` per distinct URL, shared by everything in the process.
pub struct BrokerRegistry {
    transport: Arc<dyn Transport>,
    acquire_timeout: Duration,
    brokers: Mutex<HashMap<String, Arc<Broker>>>,
}

impl BrokerRegistry {
    pub fn new(transport: Arc<dyn Transport>, acquire_timeout: Duration) -> Self {
        Self { transport, acquire_timeout, brokers: Mutex::default() }
    }

    pub fn get(&self, url: &str) -> Result<Arc<Broker>, BrokerError> {
        if let Some(existing) = self.brokers.lock().get(url) {
            return Ok(Arc::clone(existing));
        }
        let broker =
            Arc::new(Broker::new(Arc::clone(&self.transport), url, self.acquire_timeout)?);
        let mut brokers = self.brokers.lock();
        let entry = brokers.entry(url.to_string()).or_insert(broker);
        Ok(Arc::clone(entry))
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
