// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared branch state.
//!
//! Tracks broker revivals so the supervisor can tell a dead worker from
//! a flaky connection, and holds the supervisor handle so connection
//! observers can pause/resume it. This is the explicit object standing
//! in for the original's process globals.

use crate::supervisor::{OfflineSupervisor, Supervise};
use drover_broker::ConnectionEvents;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

pub struct BranchState {
    broker_last_revived: Mutex<Option<Instant>>,
    supervisor: Mutex<Option<Arc<dyn Supervise>>>,
}

impl BranchState {
    pub fn new() -> Self {
        Self { broker_last_revived: Mutex::new(None), supervisor: Mutex::new(None) }
    }

    /// Install the live supervisor; until then the offline null object
    /// answers.
    pub fn set_supervisor(&self, supervisor: Arc<dyn Supervise>) {
        *self.supervisor.lock() = Some(supervisor);
    }

    pub fn supervisor(&self) -> Arc<dyn Supervise> {
        self.supervisor.lock().clone().unwrap_or_else(|| Arc::new(OfflineSupervisor))
    }

    /// Record a broker revival and resume the supervisor.
    pub fn on_broker_revive(&self) {
        *self.broker_last_revived.lock() = Some(Instant::now());
        self.supervisor().resume();
    }

    /// `None` when the broker never revived (never was lost).
    pub fn time_since_broker_revived(&self) -> Option<Duration> {
        self.broker_last_revived.lock().map(|at| at.elapsed())
    }
}

impl Default for BranchState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionEvents for BranchState {
    fn on_connection_error(&self, error: &dyn std::fmt::Display, retry_in: Duration) {
        error!(%error, ?retry_in, "broker operation failed, pausing supervisor");
        self.supervisor().pause();
    }

    fn on_revive(&self) {
        self.on_broker_revive();
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
