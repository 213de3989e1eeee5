// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor definitions and the handler contract.

use async_trait::async_trait;
use drover_wire::ActorMeta;
use serde_json::Value;
use std::time::Duration;

/// How callers may address an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchType {
    /// Addressed to one branch by id; exactly one reply or timeout.
    Direct,
    /// Fanout to every peer; replies collected until the timeout.
    Scatter,
    /// One of the peers takes it; exactly one reply.
    RoundRobin,
}

/// Static description of one actor.
#[derive(Debug, Clone)]
pub struct ActorSpec {
    /// Actor name, stable across branches (`"Instance"`).
    pub name: &'static str,
    /// Exchange name, stable across branches (`"drover.Instance"`).
    pub exchange: String,
    pub types: Vec<DispatchType>,
    /// Timeout for addressed (direct/round-robin) calls.
    pub default_timeout: Duration,
    /// Collection window for scatter calls; scatters always run the
    /// full window unless bounded by an expected reply count.
    pub scatter_timeout: Duration,
    /// Meta section peers consult to route names to this actor's branch.
    pub meta_section: Option<&'static str>,
}

impl ActorSpec {
    pub fn new(name: &'static str, types: Vec<DispatchType>) -> Self {
        Self {
            name,
            exchange: format!("drover.{name}"),
            types,
            default_timeout: Duration::from_secs(2),
            scatter_timeout: Duration::from_secs(2),
            meta_section: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_meta_section(mut self, section: &'static str) -> Self {
        self.meta_section = Some(section);
        self
    }

    pub fn supports(&self, dispatch: DispatchType) -> bool {
        self.types.contains(&dispatch)
    }

    /// Fanout companion exchange for scatter dispatch.
    pub fn scatter_exchange(&self) -> String {
        format!("{}.scatter", self.exchange)
    }

    /// Shared queue all peers consume for round-robin dispatch.
    pub fn round_robin_queue(&self) -> String {
        format!("{}.rr", self.exchange)
    }

    /// This branch's queue on the direct exchange.
    pub fn direct_queue(&self, branch_id: &str) -> String {
        format!("{}.{branch_id}", self.exchange)
    }

    /// This branch's queue on the scatter exchange.
    pub fn scatter_queue(&self, branch_id: &str) -> String {
        format!("{}.scatter.{branch_id}", self.exchange)
    }
}

/// Handler outcome before serialization.
pub type HandlerResult = Result<Value, HandlerError>;

#[derive(Debug)]
pub enum HandlerError {
    /// Yield to the next peer in the dispatch.
    Next,
    /// Real failure; serialized as `{"nok": [repr, trace]}`.
    Failure { repr: String, trace: String },
}

impl HandlerError {
    pub fn failure(err: impl std::fmt::Display) -> Self {
        HandlerError::Failure { repr: err.to_string(), trace: String::new() }
    }

    pub fn failure_with_trace(err: impl std::fmt::Display, trace: impl Into<String>) -> Self {
        HandlerError::Failure { repr: err.to_string(), trace: trace.into() }
    }
}

/// The handler namespace of one actor, running inside the recipient
/// branch.
///
/// `dispatch` is a static method→handler map; unknown methods are a
/// failure, not a panic.
#[async_trait]
pub trait ActorState: Send + Sync {
    fn spec(&self) -> &ActorSpec;

    async fn dispatch(&self, method: &str, args: &Value) -> HandlerResult;

    /// Names this actor advertises for presence routing.
    fn meta(&self) -> ActorMeta {
        ActorMeta::new()
    }
}

#[cfg(test)]
#[path = "actor_tests.rs"]
mod tests;
