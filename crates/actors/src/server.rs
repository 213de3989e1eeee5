// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server side: bind actor queues and dispatch envelopes to handlers.

use crate::actor::{ActorState, DispatchType, HandlerError};
use crate::error::DispatchError;
use drover_broker::{Connection, Delivery, ExchangeKind, Producer};
use drover_wire::{Envelope, Reply, ReplyBody};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The actors one branch hosts on one connection.
pub struct ActorHost {
    branch_id: String,
    actors: Vec<Arc<dyn ActorState>>,
}

impl ActorHost {
    pub fn new(branch_id: impl Into<String>, actors: Vec<Arc<dyn ActorState>>) -> Self {
        Self { branch_id: branch_id.into(), actors }
    }

    /// Declare the exchange topology, bind this branch's queues, and
    /// start consuming. Queue layout per actor:
    ///
    /// - direct: `<x>.<branch>` on direct exchange `<x>`, key = branch id
    /// - scatter: `<x>.scatter.<branch>` on fanout `<x>.scatter`
    /// - round-robin: shared queue `<x>.rr`, all branches consume
    pub async fn bind(self, conn: &Arc<dyn Connection>) -> Result<BoundActors, DispatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pumps = Vec::new();
        for (idx, actor) in self.actors.iter().enumerate() {
            let spec = actor.spec();
            if spec.supports(DispatchType::Direct) {
                conn.declare_exchange(&spec.exchange, ExchangeKind::Direct).await?;
                let queue = spec.direct_queue(&self.branch_id);
                conn.declare_queue(&queue, true).await?;
                conn.bind_queue(&queue, &spec.exchange, &self.branch_id).await?;
                pumps.push(pump(idx, conn.consume(&queue).await?, tx.clone()));
            }
            if spec.supports(DispatchType::Scatter) {
                let exchange = spec.scatter_exchange();
                conn.declare_exchange(&exchange, ExchangeKind::Fanout).await?;
                let queue = spec.scatter_queue(&self.branch_id);
                conn.declare_queue(&queue, true).await?;
                conn.bind_queue(&queue, &exchange, "").await?;
                pumps.push(pump(idx, conn.consume(&queue).await?, tx.clone()));
            }
            if spec.supports(DispatchType::RoundRobin) {
                let queue = spec.round_robin_queue();
                conn.declare_queue(&queue, false).await?;
                pumps.push(pump(idx, conn.consume(&queue).await?, tx.clone()));
            }
        }
        let producer = conn.producer().await?;
        Ok(BoundActors { branch_id: self.branch_id, actors: self.actors, producer, rx, pumps })
    }
}

fn pump(
    idx: usize,
    mut sub: drover_broker::Subscription,
    tx: mpsc::UnboundedSender<(usize, Delivery)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = sub.recv().await {
            if tx.send((idx, delivery)).is_err() {
                break;
            }
        }
    })
}

/// A bound, consuming set of actors.
pub struct BoundActors {
    branch_id: String,
    actors: Vec<Arc<dyn ActorState>>,
    producer: Box<dyn Producer>,
    rx: mpsc::UnboundedReceiver<(usize, Delivery)>,
    pumps: Vec<JoinHandle<()>>,
}

impl BoundActors {
    /// Next inbound message; `None` when every queue is gone.
    pub async fn next(&mut self) -> Option<(usize, Delivery)> {
        self.rx.recv().await
    }

    /// Decode, run the handler, and reply if the caller asked for one.
    /// Returns the `(actor, method)` that was dispatched, so hosts can
    /// react (e.g. re-announce presence after a mutation).
    pub async fn dispatch(&self, idx: usize, delivery: Delivery) -> Option<(&'static str, String)> {
        let actor = self.actors.get(idx)?;
        let envelope = match Envelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(actor = actor.spec().name, error = %err, "undecodable envelope");
                return None;
            }
        };
        debug!(
            actor = actor.spec().name,
            method = %envelope.method,
            sender = %envelope.sender,
            "dispatching"
        );
        let body = match actor.dispatch(&envelope.method, &envelope.args).await {
            Ok(value) => ReplyBody::ok(value),
            Err(HandlerError::Next) => ReplyBody::next(),
            Err(HandlerError::Failure { repr, trace }) => ReplyBody::nok(repr, trace),
        };
        let dispatched = (actor.spec().name, envelope.method.clone());
        let Some(reply_to) = envelope.reply_to else {
            return Some(dispatched);
        };
        let reply = Reply {
            correlation_id: envelope.correlation_id,
            sender: self.branch_id.clone(),
            body,
        };
        match reply.encode() {
            Ok(bytes) => {
                if let Err(err) = self.producer.publish("", &reply_to, &bytes).await {
                    warn!(error = %err, "failed to publish reply");
                }
            }
            Err(err) => warn!(error = %err, "unencodable reply"),
        }
        Some(dispatched)
    }

    /// Drive the host until cancelled (tests and simple hosts; the
    /// controller interleaves its own loop).
    pub fn serve(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = self.next() => {
                        let Some((idx, delivery)) = message else { break };
                        self.dispatch(idx, delivery).await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl Drop for BoundActors {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}
