// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process management.
//!
//! Actions delegate to an external process manager program with argv
//! built deterministically from the instance record and its app.

use crate::instance::AdapterError;
use async_trait::async_trait;
use tracing::info;

/// Process-manager actions the adapter can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    Start,
    Stop,
    Restart,
    StopVerify,
}

impl WorkerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerAction::Start => "start",
            WorkerAction::Stop => "stop",
            WorkerAction::Restart => "restart",
            WorkerAction::StopVerify => "stop_verify",
        }
    }
}

/// Runs process-manager invocations.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn run(&self, action: WorkerAction, argv: &[String]) -> Result<(), AdapterError>;
}

/// Production runner shelling out to the configured multi tool.
pub struct MultiRunner {
    program: String,
}

impl MultiRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for MultiRunner {
    fn default() -> Self {
        Self::new("celeryd-multi")
    }
}

#[async_trait]
impl WorkerRunner for MultiRunner {
    async fn run(&self, action: WorkerAction, argv: &[String]) -> Result<(), AdapterError> {
        info!(program = %self.program, action = action.as_str(), "{}", argv.join(" "));
        let output = tokio::process::Command::new(&self.program)
            .args(argv)
            .output()
            .await
            .map_err(|e| AdapterError::Process(format!("{}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(AdapterError::Process(format!(
                "{} {} exited with {}: {}",
                self.program,
                action.as_str(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Split a free-text argument string, honoring quotes.
///
/// Covers the shapes operators actually put in the arguments/extra
/// config columns: whitespace separation, single/double quotes, and
/// backslash escapes outside single quotes.
pub fn split_args(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(_) => match c {
                '"' => quote = None,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_word = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        out.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        out.push(current);
    }
    out
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Recording runner for tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type ActionHook = dyn Fn(WorkerAction, &[String]) + Send + Sync;

    /// Records every invocation; an optional hook lets tests couple
    /// actions to a fake worker (e.g. restart ⇒ revive).
    #[derive(Clone, Default)]
    pub struct FakeRunner {
        calls: Arc<Mutex<Vec<(WorkerAction, Vec<String>)>>>,
        hook: Arc<Mutex<Option<Box<ActionHook>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<(WorkerAction, Vec<String>)> {
            self.calls.lock().clone()
        }

        pub fn actions(&self) -> Vec<WorkerAction> {
            self.calls.lock().iter().map(|(a, _)| *a).collect()
        }

        pub fn set_hook(&self, hook: impl Fn(WorkerAction, &[String]) + Send + Sync + 'static) {
            *self.hook.lock() = Some(Box::new(hook));
        }

        pub fn fail_next(&self, fail: bool) {
            *self.fail.lock() = fail;
        }
    }

    #[async_trait]
    impl WorkerRunner for FakeRunner {
        async fn run(&self, action: WorkerAction, argv: &[String]) -> Result<(), AdapterError> {
            if *self.fail.lock() {
                return Err(AdapterError::Process("fake runner told to fail".to_string()));
            }
            self.calls.lock().push((action, argv.to_vec()));
            if let Some(hook) = self.hook.lock().as_ref() {
                hook(action, argv);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
