// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal watchdog.
//!
//! Each branch component runs under a watchdog that starts it, waits
//! for its ready signal, then pings it forever. A ping timeout or
//! failure means the component hung or crashed silently, and the whole
//! process is taken down — a dead supervisor must never keep looking
//! alive.

use crate::signals::{Signal, SignalHub};
use crate::task::{fatal, Task, TaskCell, TaskContext, TaskError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Decides whether a ping outcome is fatal. Split out so the policy is
/// testable without taking the test process down.
pub(crate) fn ping_verdict(pong: bool, stopping: bool) -> Option<&'static str> {
    if pong || stopping {
        None
    } else {
        Some("suspected task crash or blocking")
    }
}

pub struct Watchdog {
    child: TaskCell,
    signals: SignalHub,
    /// Recognizes the child's ready signal.
    ready: Box<dyn Fn(&Signal) -> bool + Send + Sync>,
    interval: Duration,
    timeout: Duration,
    /// With DEBUG_BLOCK, log when our own tick is late (event loop
    /// starvation).
    debug_block: bool,
}

impl Watchdog {
    pub fn new(
        child: TaskCell,
        signals: SignalHub,
        ready: impl Fn(&Signal) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            child,
            signals,
            ready: Box::new(ready),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            debug_block: false,
        }
    }

    pub fn with_intervals(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }

    pub fn with_block_detection(mut self, enabled: bool) -> Self {
        self.debug_block = enabled;
        self
    }
}

#[async_trait]
impl Task for Watchdog {
    fn name(&self) -> String {
        format!("watchdog<{}>", self.child.name())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        debug!(child = %self.child.name(), "starting");
        // subscribe before starting so the ready signal cannot be missed
        let mut signals = self.signals.subscribe();
        self.child.start().await?;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                signal = signals.recv() => {
                    match signal {
                        Ok(signal) if (self.ready)(&signal) => break,
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
        info!(child = %self.child.name(), "started");

        loop {
            let slept_at = Instant::now();
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if self.debug_block && slept_at.elapsed() > self.interval * 2 {
                warn!(
                    child = %self.child.name(),
                    expected = ?self.interval,
                    actual = ?slept_at.elapsed(),
                    "watchdog tick delayed, event loop may be blocked"
                );
            }
            ctx.respond_to_ping();
            let pong = self.child.ping(self.timeout).await;
            if let Some(reason) = ping_verdict(pong, ctx.should_stop()) {
                fatal(&self.name(), reason);
            }
        }
        Ok(())
    }

    /// Stop propagates to the child.
    async fn after(&mut self) {
        self.child.stop(true, Duration::from_secs(10)).await;
    }
}

#[cfg(test)]
#[path = "intsup_tests.rs"]
mod tests;
