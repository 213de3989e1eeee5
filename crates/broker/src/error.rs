// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker is unreachable or the connection dropped.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// No producer became available within the acquire timeout.
    #[error("timed out acquiring a producer from the pool")]
    AcquireTimeout,

    /// The pool rejected the request (closed or misconfigured).
    #[error("broker pool error: {0}")]
    Pool(String),

    #[error("payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl BrokerError {
    /// Whether the error should be handled by the insured retry loop.
    pub fn is_connection_error(&self) -> bool {
        match self {
            BrokerError::Connection(_) | BrokerError::Pool(_) | BrokerError::AcquireTimeout => true,
            BrokerError::Amqp(err) => matches!(
                err,
                lapin::Error::IOError(_)
                    | lapin::Error::InvalidConnectionState(_)
                    | lapin::Error::InvalidChannelState(_)
            ),
            BrokerError::Payload(_) => false,
        }
    }
}
