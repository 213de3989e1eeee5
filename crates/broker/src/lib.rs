// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-broker: the messaging layer.
//!
//! A small transport contract (connections, producers, subscriptions)
//! with an AMQP implementation and an in-memory implementation for
//! tests, bounded connection/producer pools per broker URL, the
//! `insured` reconnect-and-retry wrapper, and the worker control
//! protocol client.

mod amqp;
mod control;
mod error;
mod insured;
mod pool;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use amqp::AmqpTransport;
pub use control::{Broadcast, ControlClient};
pub use error::BrokerError;
pub use insured::{insured, ConnectionEvents, Insurable, NullEvents};
pub use pool::{Broker, BrokerRegistry, PooledConnection, PooledProducer};
pub use transport::{Connection, Delivery, ExchangeKind, Producer, Subscription, Transport};

#[cfg(any(test, feature = "test-support"))]
pub use control::fake_worker::{FakeWorker, FakeWorkerHandle};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryTransport;

/// Exchange carrying broadcast worker control commands.
pub const CONTROL_EXCHANGE: &str = "drover.control";

/// Prefix for per-call reply queues.
pub const REPLY_PREFIX: &str = "drover.reply";
