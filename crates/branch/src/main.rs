// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! droverd: run one branch of the drover control plane.

use clap::Parser;
use drover_branch::branch::{Branch, BranchOptions};
use drover_broker::AmqpTransport;
use drover_core::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "droverd", about = "drover branch daemon", version)]
struct Args {
    /// Listen address for the HTTP API, as `[host]:port` or `port`.
    #[arg(short = 'p', long = "addrport", default_value = ":8000")]
    addrport: String,

    /// Branch id; a uuid is generated when omitted.
    #[arg(long)]
    id: Option<String>,

    /// Number of controllers.
    #[arg(short = 'c', long, default_value_t = 2)]
    numc: usize,

    /// Supervisor verify interval in seconds.
    #[arg(short = 'i', long = "sup-interval")]
    sup_interval: Option<f64>,

    /// Serve no HTTP API from this branch.
    #[arg(long)]
    without_httpd: bool,

    /// Log level (overridden by RUST_LOG and DEBUG).
    #[arg(short = 'l', long, default_value = "info")]
    loglevel: String,

    /// Append logs to this file instead of stderr.
    #[arg(short = 'f', long)]
    logfile: Option<String>,
}

fn parse_addrport(raw: &str) -> (String, u16) {
    match raw.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(8000)),
        None => (String::new(), raw.parse().unwrap_or(8000)),
    }
}

fn init_tracing(args: &Args, config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if config.debug { "debug" } else { &args.loglevel };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    match &args.logfile {
        Some(path) => {
            let file = tracing_appender::rolling::never(
                std::path::Path::new(path).parent().unwrap_or(std::path::Path::new(".")),
                std::path::Path::new(path)
                    .file_name()
                    .unwrap_or(std::ffi::OsStr::new("branch.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = {
        let mut config = Config::from_env();
        if let Some(interval) = args.sup_interval {
            config.supervisor_interval = std::time::Duration::from_secs_f64(interval);
        }
        config
    };
    let _log_guard = init_tracing(&args, &config);

    let (addr, port) = parse_addrport(&args.addrport);
    let options = BranchOptions {
        id: args.id,
        addr,
        port,
        numc: args.numc,
        without_httpd: args.without_httpd,
        loglevel: args.loglevel,
        logfile: args.logfile,
        ..BranchOptions::default()
    };

    let mut branch = Branch::new(config, Arc::new(AmqpTransport), options).await?;
    info!(id = %branch.id, "branch constructed");

    let exit = branch.exit_token();
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        info!("termination signal received, requesting shutdown");
        exit.cancel();
    });

    branch.run(None).await?;
    Ok(())
}
