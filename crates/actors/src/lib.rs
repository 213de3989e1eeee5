// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-actors: typed RPC over broker exchanges.
//!
//! An actor is a named endpoint with a stable exchange, a set of
//! dispatch types (direct, scatter, round-robin), a handler state that
//! runs in the recipient branch, and optionally a list of names it
//! advertises for presence-based routing.

mod actor;
mod client;
mod error;
mod presence;
mod server;

pub use actor::{ActorSpec, ActorState, DispatchType, HandlerError, HandlerResult};
pub use client::ActorClient;
pub use error::DispatchError;
pub use presence::{listen_for_presence, publish_presence, RoutingTable, PRESENCE_EXCHANGE};
pub use server::ActorHost;
