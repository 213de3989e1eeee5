// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle signals.
//!
//! Components broadcast their lifecycle milestones here; the branch
//! aggregates them into readiness and shutdown-completion maps. Losing
//! a signal to a lagging subscriber is acceptable for log purposes but
//! not for readiness, so the hub keeps a generous buffer.

use tokio::sync::broadcast;

/// One lifecycle milestone, tagged with the emitting component's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    PreStart(String),
    PostStart(String),
    PreJoin(String),
    PostJoin(String),
    PreShutdown(String),
    PostShutdown(String),
    Exit(String),
    /// Pulse emitted whenever a component passes a shutdown milestone;
    /// drives shutdown progress reporting.
    ShutdownStep(String),

    SupervisorReady,
    ControllerReady(String),
    PresenceReady(String),
    HttpdReady { url: String },

    BranchReady,
    BranchShutdownComplete,
}

/// Broadcast hub for lifecycle signals.
#[derive(Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<Signal>,
}

impl SignalHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Emit to whoever listens; no subscribers is fine.
    pub fn emit(&self, signal: Signal) {
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "signals_tests.rs"]
mod tests;
