// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The insured call wrapper.
//!
//! Ensures an operation depending on the broker completes despite
//! intermittent connection failures: retry with backoff on connection
//! errors, report every error to the observer (which pauses the
//! supervisor), and report the revival once the broker answers again
//! (which resumes it).

use crate::error::BrokerError;
use crate::pool::Broker;
use drover_core::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors the insured loop knows how to classify.
pub trait Insurable {
    fn is_connection_error(&self) -> bool;
}

impl Insurable for BrokerError {
    fn is_connection_error(&self) -> bool {
        BrokerError::is_connection_error(self)
    }
}

/// Observer of connection failures and revivals.
///
/// The branch state implements this: errors pause the supervisor,
/// revivals stamp the revival clock and resume it.
pub trait ConnectionEvents: Send + Sync {
    fn on_connection_error(&self, error: &dyn std::fmt::Display, retry_in: Duration);
    fn on_revive(&self);
}

/// No-op observer for callers outside a branch.
pub struct NullEvents;

impl ConnectionEvents for NullEvents {
    fn on_connection_error(&self, _error: &dyn std::fmt::Display, _retry_in: Duration) {}
    fn on_revive(&self) {}
}

/// Run `op` against the broker, retrying on connection errors.
///
/// Each attempt first checks out a pooled connection, so a dead broker
/// is detected before `op` does any half-work. Non-connection errors
/// propagate immediately; exhausting the retry policy surfaces the last
/// connection error to the caller.
pub async fn insured<T, E, F, Fut>(
    broker: &Broker,
    events: &dyn ConnectionEvents,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    E: Insurable + From<BrokerError> + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut revived = false;
    let mut delays = policy.delays();
    loop {
        let attempt = async {
            broker.connection().await.map_err(E::from)?;
            op().await
        };
        match attempt.await {
            Ok(value) => {
                if revived {
                    events.on_revive();
                }
                return Ok(value);
            }
            Err(err) if err.is_connection_error() => {
                let Some(delay) = delays.next() else {
                    warn!(url = broker.url(), error = %err, "broker retries exhausted");
                    return Err(err);
                };
                events.on_connection_error(&err, delay);
                revived = true;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[path = "insured_tests.rs"]
mod tests;
