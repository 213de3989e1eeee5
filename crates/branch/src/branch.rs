// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Branch composition.
//!
//! One Supervisor, N Controllers, and the HTTP server, each under an
//! internal watchdog. Startup aggregates the components' ready signals
//! into `branch_ready`; shutdown walks the components in reverse start
//! order and reports completion.

use crate::clients::{ActorQueueDirectory, FleetClients};
use crate::controller::{Controller, ControllerSeed};
use crate::httpd::{HttpServer, HttpState, TaskDispatcher};
use crate::intsup::Watchdog;
use crate::managers::LocalInstanceManager;
use crate::signals::{Signal, SignalHub};
use crate::state::BranchState;
use crate::supervisor::{Completion, Supervisor, SupervisorOptions};
use crate::task::{TaskCell, TaskError};
use drover_actors::RoutingTable;
use drover_adapters::{InstanceAdapter, MultiRunner, WorkerRunner};
use drover_broker::{BrokerError, BrokerRegistry, Transport};
use drover_core::Config;
use drover_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum BranchError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Self-description served by the Branch actor and `/branches/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub id: String,
    pub numc: usize,
    pub sup_interval: f64,
    pub loglevel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Knobs for one branch process.
pub struct BranchOptions {
    /// Branch id; generated when absent.
    pub id: Option<String>,
    /// HTTP listen address, `"":port` binds every interface.
    pub addr: String,
    pub port: u16,
    /// Controllers per branch.
    pub numc: usize,
    pub without_httpd: bool,
    pub loglevel: String,
    pub logfile: Option<String>,
    /// Worker process runner; the celeryd-multi-compatible default in
    /// production, a fake in tests.
    pub runner: Option<Arc<dyn WorkerRunner>>,
    /// Supervisor tuning; defaults derive from the config interval.
    pub supervisor: Option<SupervisorOptions>,
    /// Watchdog cadence `(interval, ping timeout)`.
    pub watchdog: (Duration, Duration),
}

impl Default for BranchOptions {
    fn default() -> Self {
        Self {
            id: None,
            addr: String::new(),
            port: 8000,
            numc: 2,
            without_httpd: false,
            loglevel: "info".to_string(),
            logfile: None,
            runner: None,
            supervisor: None,
            watchdog: (Duration::from_secs(5), Duration::from_secs(600)),
        }
    }
}

pub struct Branch {
    pub id: String,
    info: BranchInfo,
    signals: SignalHub,
    exit: CancellationToken,
    components: Vec<TaskCell>,
    store: Store,
    state: Arc<BranchState>,
    local: Arc<LocalInstanceManager>,
    http_state: HttpState,
    ready_checks: Vec<ReadyCheck>,
}

type ReadyCheck = Box<dyn Fn(&Signal) -> bool + Send + Sync>;

impl Branch {
    pub async fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        options: BranchOptions,
    ) -> Result<Self, BranchError> {
        let id = options.id.clone().unwrap_or_else(drover_core::uuid);
        let signals = SignalHub::new();
        let exit = CancellationToken::new();

        let registry =
            Arc::new(BrokerRegistry::new(transport, config.producer_acquire_timeout));
        let store = Store::open(PathBuf::from(&config.db_name), &config.broker_url)?;
        let state = Arc::new(BranchState::new());
        let router = Arc::new(RoutingTable::new(config.presence_interval * 3));
        let broker = registry.get(&config.broker_url)?;
        let clients =
            FleetClients::new(Arc::clone(&broker), &id, Arc::clone(&router), store.clone());

        let directory =
            Arc::new(ActorQueueDirectory::new(store.clone(), clients.queues.clone()));
        let runner: Arc<dyn WorkerRunner> =
            options.runner.clone().unwrap_or_else(|| Arc::new(MultiRunner::default()));
        let adapter = Arc::new(InstanceAdapter::new(
            store.clone(),
            Arc::clone(&registry),
            runner,
            directory,
            &config,
        ));

        let supervisor_options = options.supervisor.clone().unwrap_or(SupervisorOptions {
            interval: config.supervisor_interval,
            ..SupervisorOptions::default()
        });
        let sup_interval = supervisor_options.interval.as_secs_f64();
        let (supervisor, handle) = Supervisor::new(
            store.clone(),
            Arc::clone(&adapter),
            Arc::clone(&state),
            signals.clone(),
            supervisor_options,
        );
        state.set_supervisor(Arc::new(handle.clone()));
        let local = Arc::new(LocalInstanceManager::new(store.clone(), Arc::new(handle)));

        // bind the HTTP listener up front so the advertised URL carries
        // the real port
        let http = if options.without_httpd {
            None
        } else {
            let bind_addr =
                if options.addr.is_empty() { "0.0.0.0" } else { options.addr.as_str() };
            let listener = TcpListener::bind((bind_addr, options.port)).await?;
            let actual = listener.local_addr()?;
            let host = if bind_addr == "0.0.0.0" { "127.0.0.1" } else { bind_addr };
            Some((listener, format!("http://{host}:{}", actual.port()), actual.port()))
        };

        let info = BranchInfo {
            id: id.clone(),
            numc: options.numc,
            sup_interval,
            loglevel: options.loglevel.clone(),
            logfile: options.logfile.clone(),
            port: http.as_ref().map(|(_, _, port)| *port),
            url: http.as_ref().map(|(_, url, _)| url.clone()),
        };

        let tasks = Arc::new(TaskDispatcher::new(Arc::clone(&registry)));
        let http_state =
            HttpState { clients: clients.clone(), store: store.clone(), tasks };

        let (watchdog_interval, watchdog_timeout) = options.watchdog;
        let watched = |cell: TaskCell,
                       signals: &SignalHub,
                       ready: ReadyCheck|
         -> TaskCell {
            let watchdog = Watchdog::new(cell, signals.clone(), ready)
                .with_intervals(watchdog_interval, watchdog_timeout)
                .with_block_detection(config.debug_block);
            TaskCell::new(watchdog, signals.clone())
        };

        let mut components = Vec::new();
        let mut ready_checks: Vec<ReadyCheck> = Vec::new();

        components.push(watched(
            TaskCell::new(supervisor, signals.clone()),
            &signals,
            Box::new(|signal| matches!(signal, Signal::SupervisorReady)),
        ));
        ready_checks.push(Box::new(|signal| matches!(signal, Signal::SupervisorReady)));

        for index in 1..=options.numc {
            let controller = Controller::new(ControllerSeed {
                index,
                info: info.clone(),
                broker: Arc::clone(&broker),
                store: store.clone(),
                local: Arc::clone(&local),
                adapter: Arc::clone(&adapter),
                router: Arc::clone(&router),
                state: Arc::clone(&state),
                signals: signals.clone(),
                config: config.clone(),
                exit: exit.clone(),
            });
            let controller_id = format!("{id}.{index}");
            let ready_id = controller_id.clone();
            components.push(watched(
                TaskCell::new(controller, signals.clone()),
                &signals,
                Box::new(move |signal| {
                    matches!(signal, Signal::ControllerReady(cid) if *cid == ready_id)
                }),
            ));
            let ready_id = controller_id.clone();
            ready_checks.push(Box::new(move |signal| {
                matches!(signal, Signal::ControllerReady(cid) if *cid == ready_id)
            }));
            ready_checks.push(Box::new(move |signal| {
                matches!(signal, Signal::PresenceReady(cid) if *cid == controller_id)
            }));
        }

        if let Some((listener, url, _)) = http {
            let server = HttpServer::new(listener, url, http_state.clone(), signals.clone());
            components.push(watched(
                TaskCell::new(server, signals.clone()),
                &signals,
                Box::new(|signal| matches!(signal, Signal::HttpdReady { .. })),
            ));
            ready_checks.push(Box::new(|signal| matches!(signal, Signal::HttpdReady { .. })));
        }

        Ok(Self { id, info, signals, exit, components, store, state, local, http_state, ready_checks })
    }

    pub fn info(&self) -> &BranchInfo {
        &self.info
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> &Arc<BranchState> {
        &self.state
    }

    pub fn local_manager(&self) -> &Arc<LocalInstanceManager> {
        &self.local
    }

    pub fn http_state(&self) -> &HttpState {
        &self.http_state
    }

    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    /// Cancelling this token requests branch shutdown (also reachable
    /// through the Branch actor's `shutdown` method and SIGTERM).
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Start every component, signal `branch_ready` when the readiness
    /// map fills, then block until shutdown is requested and stop
    /// everything in reverse order.
    pub async fn run(&mut self, ready: Option<Arc<Completion>>) -> Result<(), BranchError> {
        info!(id = %self.id, short = drover_core::short(&self.id), "starting branch");

        // subscribe before starting so no ready signal can be missed
        let mut rx = self.signals.subscribe();
        let mut pending = std::mem::take(&mut self.ready_checks);
        let signals = self.signals.clone();
        let watcher = tokio::spawn(async move {
            while !pending.is_empty() {
                let Ok(signal) = rx.recv().await else { return };
                pending.retain(|check| !check(&signal));
            }
            info!("branch ready");
            signals.emit(Signal::BranchReady);
            if let Some(ready) = ready {
                ready.complete();
            }
        });

        for component in &mut self.components {
            component.start().await?;
        }

        self.exit.cancelled().await;
        watcher.abort();
        self.shutdown().await;
        Ok(())
    }

    /// Reverse-order stop; errors are logged, never fatal here.
    async fn shutdown(&mut self) {
        info!(id = %self.id, "branch shutting down");
        for component in self.components.iter().rev() {
            component.stop(true, Duration::from_secs(30)).await;
        }
        self.signals.emit(Signal::BranchShutdownComplete);
        info!(id = %self.id, "branch shutdown complete");
    }
}

#[cfg(test)]
#[path = "branch_tests.rs"]
mod tests;
