// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout schedules: the post-restart ping ramp and the reconnect
//! backoff used by the insured broker wrapper.

use std::time::Duration;

/// Ramp of ping timeouts probed after restarting a worker.
///
/// Yields `start`, `start + step`, ... capped at `stop`, repeating the
/// cap until `max_probes` values have been produced. The defaults give
/// `{0.1, 0.5, 0.9, 1.0, 1.0, ...}` for up to 30 probes.
#[derive(Debug, Clone, Copy)]
pub struct PingSchedule {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub max_probes: usize,
}

impl Default for PingSchedule {
    fn default() -> Self {
        Self { start: 0.1, stop: 1.0, step: 0.4, max_probes: 30 }
    }
}

impl PingSchedule {
    pub fn timeouts(&self) -> impl Iterator<Item = Duration> + '_ {
        let stop = self.stop;
        (0..self.max_probes).map(move |i| {
            let t = (self.start + self.step * i as f64).min(stop);
            Duration::from_secs_f64(t)
        })
    }
}

/// Exponential backoff used when re-establishing broker connections.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub first: Duration,
    pub factor: f64,
    pub max_interval: Duration,
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            factor: 2.0,
            max_interval: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let first = self.first.as_secs_f64();
        let cap = self.max_interval.as_secs_f64();
        (0..self.max_retries)
            .map(move |i| Duration::from_secs_f64((first * self.factor.powi(i as i32)).min(cap)))
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
