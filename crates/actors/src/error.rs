// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use drover_broker::BrokerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No peer advertises the requested name. Maps to HTTP 404.
    #[error("no route to {0}")]
    NoRoute(String),

    /// The broker RPC timed out. Maps to HTTP 408.
    #[error("no reply within the timeout")]
    NoReply,

    /// The remote handler failed; carries its `[repr, trace]` pair.
    #[error("remote handler failed: {repr}")]
    Nok { repr: String, trace: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("bad payload: {0}")]
    Wire(#[from] serde_json::Error),
}
