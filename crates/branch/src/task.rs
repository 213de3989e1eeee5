// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cooperative task primitive.
//!
//! Every branch component (supervisor, controllers, HTTP server,
//! watchdogs) is one task with a `before` → `run` → `after` contract, a
//! ping mailbox its run loop must drain, tracked periodic timers, and a
//! one-shot exit event consumed by `join`. A crash or internal timeout
//! inside `run` is fatal to the whole process; there is no in-process
//! recovery.

use crate::signals::{Signal, SignalHub};
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task already started")]
    AlreadyStarted,

    #[error("join timed out after {0:?}")]
    JoinTimeout(Duration),

    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Log critically and take the process down. Used for task crashes and
/// watchdog ping timeouts; there is deliberately no recovery path.
pub(crate) fn fatal(component: &str, reason: &str) -> ! {
    error!(component, reason, "fatal failure, exiting process");
    std::process::exit(70);
}

/// Handed to `run`; carries the stop token and the ping mailbox.
pub struct TaskContext {
    name: String,
    cancel: CancellationToken,
    ping_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    signals: SignalHub,
}

impl TaskContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Token view of the stop signal, for wiring graceful shutdowns.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Acknowledge every pending ping. Run loops call this on every
    /// iteration; the watchdog treats a silent loop as hung.
    pub fn respond_to_ping(&mut self) {
        while let Ok(ack) = self.ping_rx.try_recv() {
            let _ = ack.send(());
        }
    }

    /// Announce passing a shutdown milestone.
    pub fn shutdown_step(&self) {
        self.signals.emit(Signal::ShutdownStep(self.name.clone()));
    }
}

/// Periodic timers registered in `before`, cancelled at stop.
pub struct Timers {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Timers {
    fn new(handles: Arc<Mutex<Vec<JoinHandle<()>>>>) -> Self {
        Self { handles }
    }

    /// Apply `tick` every `interval`. The first tick fires one interval
    /// after registration, not immediately.
    pub fn start_periodic<F, Fut>(&self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                timer.tick().await;
                tick().await;
            }
        });
        self.handles.lock().push(handle);
    }
}

/// One branch component.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Called before the run loop spawns; register timers here.
    async fn before(&mut self, _timers: &Timers) -> Result<(), TaskError> {
        Ok(())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError>;

    /// Called after the run loop exits cleanly.
    async fn after(&mut self) {}
}

/// Control handle for a spawned task.
pub struct TaskHandle {
    name: String,
    cancel: CancellationToken,
    ping_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    exit_rx: Mutex<Option<oneshot::Receiver<()>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    timers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    signals: SignalHub,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Round-trip a one-shot request through the run loop's mailbox;
    /// true iff it acknowledged within `timeout`.
    pub async fn ping(&self, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.ping_tx.send(tx).is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Wait for the exit event. The event is one-shot: a second join
    /// returns immediately.
    pub async fn join(&self, timeout: Duration) -> Result<(), TaskError> {
        self.signals.emit(Signal::PreJoin(self.name.clone()));
        debug!(task = %self.name, ?timeout, "joining");
        let Some(rx) = self.exit_rx.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(_) => {
                self.signals.emit(Signal::PostJoin(self.name.clone()));
                Ok(())
            }
            Err(_) => Err(TaskError::JoinTimeout(timeout)),
        }
    }

    /// Cancel registered timers, request the run loop to stop, and
    /// optionally join. A join timeout forcibly kills the task.
    pub async fn stop(&self, join: bool, timeout: Duration) {
        debug!(task = %self.name, "shutdown initiated");
        self.signals.emit(Signal::PreShutdown(self.name.clone()));
        for timer in self.timers.lock().drain(..) {
            timer.abort();
        }
        self.cancel.cancel();
        if join {
            if self.join(timeout).await.is_err() {
                error!(task = %self.name, ?timeout, "exceeded exit timeout, killing");
                self.kill();
            }
        }
        self.signals.emit(Signal::PostShutdown(self.name.clone()));
    }

    /// Abort the task outright.
    pub fn kill(&self) {
        if let Some(handle) = self.join_handle.lock().as_ref() {
            handle.abort();
        }
    }
}

/// Holder enforcing the start-once contract.
pub struct TaskCell {
    name: String,
    task: Option<Box<dyn Task>>,
    handle: Option<Arc<TaskHandle>>,
    signals: SignalHub,
}

impl TaskCell {
    pub fn new(task: impl Task, signals: SignalHub) -> Self {
        Self { name: task.name(), task: Some(Box::new(task)), handle: None, signals }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `before`, spawn the run loop, and return the handle. A
    /// second start fails with `AlreadyStarted`.
    pub async fn start(&mut self) -> Result<Arc<TaskHandle>, TaskError> {
        let Some(mut task) = self.task.take() else {
            return Err(TaskError::AlreadyStarted);
        };
        let name = self.name.clone();
        self.signals.emit(Signal::PreStart(name.clone()));

        let timers = Arc::new(Mutex::new(Vec::new()));
        task.before(&Timers::new(Arc::clone(&timers))).await?;

        let cancel = CancellationToken::new();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let mut ctx = TaskContext {
            name: name.clone(),
            cancel: cancel.clone(),
            ping_rx,
            signals: self.signals.clone(),
        };

        let signals = self.signals.clone();
        let task_name = name.clone();
        let join_handle = tokio::spawn(async move {
            match AssertUnwindSafe(task.run(&mut ctx)).catch_unwind().await {
                Ok(Ok(())) => {
                    signals.emit(Signal::Exit(task_name.clone()));
                    debug!(task = %task_name, "exiting");
                    task.after().await;
                    let _ = exit_tx.send(());
                }
                Ok(Err(err)) => fatal(&task_name, &format!("task crash detected: {err}")),
                Err(_) => fatal(&task_name, "task panicked"),
            }
        });

        let handle = Arc::new(TaskHandle {
            name: name.clone(),
            cancel,
            ping_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            join_handle: Mutex::new(Some(join_handle)),
            timers,
            signals: self.signals.clone(),
        });
        self.handle = Some(Arc::clone(&handle));
        self.signals.emit(Signal::PostStart(name));
        debug!(task = %self.name, "spawned");
        Ok(handle)
    }

    pub async fn stop(&self, join: bool, timeout: Duration) {
        if let Some(handle) = &self.handle {
            handle.stop(join, timeout).await;
        }
    }

    /// Ping the running task; false when never started.
    pub async fn ping(&self, timeout: Duration) -> bool {
        match &self.handle {
            Some(handle) => handle.ping(timeout).await,
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
