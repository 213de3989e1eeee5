// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side: direct, scatter, and round-robin dispatch.

use crate::actor::ActorSpec;
use crate::error::DispatchError;
use crate::presence::RoutingTable;
use drover_broker::{Broker, ExchangeKind, Subscription, REPLY_PREFIX};
use drover_wire::{Envelope, Reply, ReplyBody};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Caller-side handle to one actor across the fleet.
#[derive(Clone)]
pub struct ActorClient {
    spec: ActorSpec,
    broker: Arc<Broker>,
    /// Branch id (or client id) stamped on outgoing envelopes.
    sender: String,
    router: Arc<RoutingTable>,
}

impl ActorClient {
    pub fn new(
        spec: ActorSpec,
        broker: Arc<Broker>,
        sender: impl Into<String>,
        router: Arc<RoutingTable>,
    ) -> Self {
        Self { spec, broker, sender: sender.into(), router }
    }

    pub fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    pub fn router(&self) -> &RoutingTable {
        &self.router
    }

    fn envelope(&self, method: &str, args: Value, reply_to: Option<String>) -> Envelope {
        Envelope {
            method: method.to_string(),
            args,
            reply_to,
            correlation_id: drover_core::uuid(),
            actor: self.spec.name.to_string(),
            sender: self.sender.clone(),
        }
    }

    // ----- direct --------------------------------------------------------

    /// Addressed call to one branch; exactly one reply or `NoReply`.
    pub async fn call(
        &self,
        to: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let timeout = timeout.unwrap_or(self.spec.default_timeout);
        let conn = self.broker.connection().await?;
        conn.declare_exchange(&self.spec.exchange, ExchangeKind::Direct).await?;

        let envelope = self.envelope(method, args, None);
        let (reply_queue, replies) = self.reply_queue(&conn, &envelope.correlation_id).await?;
        let envelope = Envelope { reply_to: Some(reply_queue.clone()), ..envelope };

        self.publish(&self.spec.exchange, to, &envelope).await?;
        let outcome =
            self.wait_single(replies, &envelope.correlation_id, to, timeout).await;
        let _ = conn.delete_queue(&reply_queue).await;
        outcome
    }

    /// Addressed fire-and-forget.
    pub async fn cast(&self, to: &str, method: &str, args: Value) -> Result<(), DispatchError> {
        let conn = self.broker.connection().await?;
        conn.declare_exchange(&self.spec.exchange, ExchangeKind::Direct).await?;
        self.publish(&self.spec.exchange, to, &self.envelope(method, args, None)).await
    }

    // ----- scatter -------------------------------------------------------

    /// Fanout to every peer, collecting replies until the timeout or
    /// `limit`. `Next` replies are skipped; `nok` replies fail the call
    /// when `propagate`, and are skipped otherwise.
    pub async fn scatter(
        &self,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
        limit: Option<usize>,
        propagate: bool,
    ) -> Result<Vec<Value>, DispatchError> {
        let timeout = timeout.unwrap_or(self.spec.scatter_timeout);
        let conn = self.broker.connection().await?;
        let exchange = self.spec.scatter_exchange();
        conn.declare_exchange(&exchange, ExchangeKind::Fanout).await?;

        let envelope = self.envelope(method, args, None);
        let (reply_queue, mut replies) = self.reply_queue(&conn, &envelope.correlation_id).await?;
        let envelope = Envelope { reply_to: Some(reply_queue.clone()), ..envelope };
        self.publish(&exchange, "", &envelope).await?;

        let mut collected = Vec::new();
        let deadline = Instant::now() + timeout;
        loop {
            if limit.is_some_and(|limit| collected.len() >= limit) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let reply = match tokio::time::timeout(remaining, replies.recv()).await {
                Ok(Some(delivery)) => Reply::decode(&delivery.payload),
                Ok(None) | Err(_) => break,
            };
            let Ok(reply) = reply else { continue };
            if reply.correlation_id != envelope.correlation_id {
                continue;
            }
            match reply.body {
                ReplyBody::Ok { ok } => collected.push(ok),
                ReplyBody::Next { .. } => {
                    debug!(actor = self.spec.name, sender = %reply.sender, "peer yielded")
                }
                ReplyBody::Nok { nok: (repr, trace) } => {
                    if propagate {
                        let _ = conn.delete_queue(&reply_queue).await;
                        return Err(DispatchError::Nok { repr, trace });
                    }
                }
            }
        }
        let _ = conn.delete_queue(&reply_queue).await;
        Ok(collected)
    }

    /// Fanout fire-and-forget.
    pub async fn scatter_cast(&self, method: &str, args: Value) -> Result<(), DispatchError> {
        let conn = self.broker.connection().await?;
        let exchange = self.spec.scatter_exchange();
        conn.declare_exchange(&exchange, ExchangeKind::Fanout).await?;
        self.publish(&exchange, "", &self.envelope(method, args, None)).await
    }

    // ----- round-robin ---------------------------------------------------

    /// Ticketed dispatch: one peer takes the message; exactly one reply.
    pub async fn throw(
        &self,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let timeout = timeout.unwrap_or(self.spec.default_timeout);
        let conn = self.broker.connection().await?;
        let queue = self.spec.round_robin_queue();
        conn.declare_queue(&queue, false).await?;

        let envelope = self.envelope(method, args, None);
        let (reply_queue, replies) = self.reply_queue(&conn, &envelope.correlation_id).await?;
        let envelope = Envelope { reply_to: Some(reply_queue.clone()), ..envelope };
        self.publish("", &queue, &envelope).await?;
        let outcome =
            self.wait_single(replies, &envelope.correlation_id, &queue, timeout).await;
        let _ = conn.delete_queue(&reply_queue).await;
        outcome
    }

    /// Round-robin fire-and-forget.
    pub async fn throw_cast(&self, method: &str, args: Value) -> Result<(), DispatchError> {
        let conn = self.broker.connection().await?;
        let queue = self.spec.round_robin_queue();
        conn.declare_queue(&queue, false).await?;
        self.publish("", &queue, &self.envelope(method, args, None)).await
    }

    // ----- presence routing ----------------------------------------------

    /// Direct-send to whichever branch advertises `name` in this
    /// actor's meta section; `NoRoute` when nobody does.
    pub async fn send_to_able(
        &self,
        name: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        if self.spec.meta_section.is_none() {
            return Err(DispatchError::NoRoute(name.to_string()));
        }
        let branch = self
            .lookup(name)
            .await
            .ok_or_else(|| DispatchError::NoRoute(name.to_string()))?;
        match self.call(&branch, method, args, timeout).await {
            Err(DispatchError::NoRoute(_)) => Err(DispatchError::NoRoute(name.to_string())),
            outcome => outcome,
        }
    }

    /// Like `send_to_able` without waiting for the reply.
    pub async fn cast_to_able(
        &self,
        name: &str,
        method: &str,
        args: Value,
    ) -> Result<(), DispatchError> {
        let branch = self
            .lookup(name)
            .await
            .ok_or_else(|| DispatchError::NoRoute(name.to_string()))?;
        self.cast(&branch, method, args).await
    }

    /// Routing-table lookup with a little patience: a name mutated a
    /// moment ago may still be in flight on the presence exchange.
    async fn lookup(&self, name: &str) -> Option<String> {
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            if let Some(branch) = self.router.route(self.spec.name, name) {
                return Some(branch);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ----- plumbing ------------------------------------------------------

    async fn reply_queue(
        &self,
        conn: &drover_broker::PooledConnection,
        correlation_id: &str,
    ) -> Result<(String, Subscription), DispatchError> {
        let queue = format!("{REPLY_PREFIX}.{correlation_id}");
        conn.declare_queue(&queue, true).await?;
        let sub = conn.consume(&queue).await?;
        Ok((queue, sub))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let payload = envelope.encode().map_err(|e| match e {
            drover_wire::WireError::Json(err) => DispatchError::Wire(err),
        })?;
        let producer = self.broker.producer().await?;
        producer.publish(exchange, routing_key, &payload).await?;
        Ok(())
    }

    async fn wait_single(
        &self,
        mut replies: Subscription,
        correlation_id: &str,
        target: &str,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DispatchError::NoReply);
            }
            match tokio::time::timeout(remaining, replies.recv()).await {
                Ok(Some(delivery)) => {
                    let Ok(reply) = Reply::decode(&delivery.payload) else { continue };
                    if reply.correlation_id != correlation_id {
                        continue;
                    }
                    return match reply.body {
                        ReplyBody::Ok { ok } => Ok(ok),
                        ReplyBody::Nok { nok: (repr, trace) } => {
                            Err(DispatchError::Nok { repr, trace })
                        }
                        ReplyBody::Next { .. } => Err(DispatchError::NoRoute(target.to_string())),
                    };
                }
                Ok(None) | Err(_) => return Err(DispatchError::NoReply),
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
