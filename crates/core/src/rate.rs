// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate strings and the token bucket behind restart rate limiting.
//!
//! Rates are written `"N/s"`, `"N/m"`, or `"N/h"`; a bare number means
//! per second. The bucket starts full with capacity `N` and refills at
//! `N` per period, so a burst of `N` operations is allowed before the
//! limiter bites.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RateError {
    #[error("invalid rate string: {0:?}")]
    Invalid(String),
}

/// A parsed `"N/period"` rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Number of operations allowed per period.
    pub count: u32,
    /// Period length in seconds.
    pub per_secs: f64,
}

impl Rate {
    /// Tokens gained per second.
    pub fn per_second(&self) -> f64 {
        f64::from(self.count) / self.per_secs
    }
}

impl FromStr for Rate {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (count_str, period) = match s.split_once('/') {
            Some((c, p)) => (c, p),
            None => (s, "s"),
        };
        let count: u32 =
            count_str.parse().map_err(|_| RateError::Invalid(s.to_string()))?;
        if count == 0 {
            return Err(RateError::Invalid(s.to_string()));
        }
        let per_secs = match period {
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(RateError::Invalid(s.to_string())),
        };
        Ok(Rate { count, per_secs })
    }
}

/// Token bucket rate limiter.
///
/// Time is supplied by the caller so the bucket itself stays clock-free
/// and testable.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    fill_rate: f64,
    tokens: f64,
    last_fill: Option<Instant>,
}

impl TokenBucket {
    pub fn new(rate: Rate) -> Self {
        let capacity = f64::from(rate.count);
        Self { capacity, fill_rate: rate.per_second(), tokens: capacity, last_fill: None }
    }

    /// Take `n` tokens if available at `now`; returns whether they were taken.
    pub fn can_consume(&mut self, n: u32, now: Instant) -> bool {
        self.refill(now);
        let n = f64::from(n);
        if self.tokens >= n {
            self.tokens -= n;
            return true;
        }
        false
    }

    fn refill(&mut self, now: Instant) {
        if let Some(last) = self.last_fill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.fill_rate).min(self.capacity);
        }
        self.last_fill = Some(now);
    }
}

#[cfg(test)]
#[path = "rate_tests.rs"]
mod tests;
