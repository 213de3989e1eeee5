// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence publication and the peer routing table.

use drover_broker::{Broker, BrokerError, Connection, ExchangeKind, Subscription};
use drover_wire::PresenceAnnounce;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fanout exchange carrying presence announcements.
pub const PRESENCE_EXCHANGE: &str = "drover.presence";

/// Publish one announcement.
pub async fn publish_presence(
    broker: &Broker,
    announce: &PresenceAnnounce,
) -> Result<(), BrokerError> {
    let conn = broker.connection().await?;
    conn.declare_exchange(PRESENCE_EXCHANGE, ExchangeKind::Fanout).await?;
    let producer = broker.producer().await?;
    producer.publish(PRESENCE_EXCHANGE, "", &serde_json::to_vec(announce)?).await
}

/// Subscribe to peer announcements with a private queue.
pub async fn listen_for_presence(
    conn: &Arc<dyn Connection>,
    branch_id: &str,
) -> Result<Subscription, BrokerError> {
    conn.declare_exchange(PRESENCE_EXCHANGE, ExchangeKind::Fanout).await?;
    let queue = format!("{PRESENCE_EXCHANGE}.{branch_id}.{}", drover_core::uuid());
    conn.declare_queue(&queue, true).await?;
    conn.bind_queue(&queue, PRESENCE_EXCHANGE, "").await?;
    conn.consume(&queue).await
}

/// Cache of `(actor, advertised name) → branch id` with TTL.
///
/// A fresh announcement replaces every entry the branch previously
/// advertised for the actors it mentions, so deletions propagate at
/// announce speed rather than TTL speed.
pub struct RoutingTable {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), (String, Instant)>>,
    peers: Mutex<HashMap<String, Instant>>,
}

impl RoutingTable {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::default(), peers: Mutex::default() }
    }

    pub fn apply(&self, announce: &PresenceAnnounce) {
        let now = Instant::now();
        self.peers.lock().insert(announce.branch_id.clone(), now);
        let mut entries = self.entries.lock();
        for (actor, meta) in &announce.meta {
            entries.retain(|(entry_actor, _), (branch, _)| {
                entry_actor != actor || branch != &announce.branch_id
            });
            for names in meta.values() {
                for name in names {
                    entries.insert(
                        (actor.clone(), name.clone()),
                        (announce.branch_id.clone(), now),
                    );
                }
            }
        }
    }

    /// Which branch advertises `name` for `actor`, if the entry is
    /// still fresh.
    pub fn route(&self, actor: &str, name: &str) -> Option<String> {
        let entries = self.entries.lock();
        let (branch, seen) = entries.get(&(actor.to_string(), name.to_string()))?;
        (seen.elapsed() <= self.ttl).then(|| branch.clone())
    }

    /// Branch ids heard from within the TTL.
    pub fn peers(&self) -> Vec<String> {
        let ttl = self.ttl;
        self.peers
            .lock()
            .iter()
            .filter(|(_, seen)| seen.elapsed() <= ttl)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
