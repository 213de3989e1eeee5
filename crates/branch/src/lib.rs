// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-branch: one control-plane process on one host.
//!
//! Composes the Supervisor (reconciling state machine), N Controllers
//! (actor hosts over the broker), the HTTP surface, and the internal
//! watchdog, wired together by lifecycle signals and an ordered
//! shutdown.

pub mod branch;
pub mod clients;
pub mod controller;
pub mod httpd;
pub mod intsup;
pub mod managers;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod task;

pub use branch::{Branch, BranchError, BranchInfo};
pub use clients::FleetClients;
pub use managers::LocalInstanceManager;
pub use signals::{Signal, SignalHub};
pub use state::BranchState;
pub use supervisor::{Completion, OfflineSupervisor, Supervise, Supervisor, SupervisorHandle};
pub use task::{Task, TaskCell, TaskContext, TaskError, TaskHandle, Timers};
