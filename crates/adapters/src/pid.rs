// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pid-file probing.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::Path;

/// Read a worker's pid file. Missing, empty, or unparsable files read
/// as no pid.
pub(crate) fn read_pid(path: &Path) -> Option<i32> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Whether `pid` responds to signal 0.
///
/// ESRCH means the process is gone; any other errno is a real problem
/// with the probe itself and surfaces as an error.
pub(crate) fn signal_probe(pid: i32) -> Result<bool, Errno> {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(errno),
    }
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
