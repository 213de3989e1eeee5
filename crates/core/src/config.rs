// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration.
//!
//! Read once from the environment at startup and threaded through
//! constructors; no component consults the environment on its own.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default broker when `DROVER_BROKER_URL` is unset.
pub const DEFAULT_BROKER_URL: &str = "amqp://127.0.0.1:5672//";

/// Name of the default application record.
pub const DEFAULT_APP: &str = "drover";

#[derive(Debug, Clone)]
pub struct Config {
    /// Enable debug logging (`DEBUG`).
    pub debug: bool,
    /// Enable watchdog block detection (`DEBUG_BLOCK`).
    pub debug_block: bool,
    /// Snapshot filename under the state directory (`DB_NAME`).
    pub db_name: String,
    /// Process-wide default broker URL (`DROVER_BROKER_URL`).
    pub broker_url: String,
    /// Root directory for per-instance work dirs (`DROVER_INSTANCE_DIR`).
    pub instance_dir: PathBuf,
    /// Worker pool kind used when an instance does not set one
    /// (`DROVER_DEFAULT_POOL`).
    pub default_pool: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Number of controllers per branch.
    pub controllers: usize,
    /// Interval between full-fleet verifies.
    pub supervisor_interval: Duration,
    /// Interval between presence announcements.
    pub presence_interval: Duration,
    /// How long to block waiting for a producer from the pool.
    pub producer_acquire_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            debug_block: false,
            db_name: "branch.db".to_string(),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            instance_dir: PathBuf::from("instances"),
            default_pool: "processes".to_string(),
            http_port: 8000,
            controllers: 2,
            supervisor_interval: Duration::from_secs(60),
            presence_interval: Duration::from_secs(30),
            producer_acquire_timeout: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            debug: flag("DEBUG"),
            debug_block: flag("DEBUG_BLOCK"),
            db_name: var("DB_NAME").unwrap_or(defaults.db_name),
            broker_url: var("DROVER_BROKER_URL").unwrap_or(defaults.broker_url),
            instance_dir: var("DROVER_INSTANCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.instance_dir),
            default_pool: var("DROVER_DEFAULT_POOL").unwrap_or(defaults.default_pool),
            ..defaults
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    var(name).map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(false)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
