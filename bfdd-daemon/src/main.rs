//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;

use std::sync::Arc;
use std::time::Duration;

use bfdd_core::{Manager, NullMetricsObserver, TokioClock};
use bfdd_transport::UdpPacketSender;
use clap::{Arg, Command};
use config::{Config, LoggingStyle};
use tracing::info;
use tracing_subscriber::prelude::*;

// Thin binary wiring config, transport and core together, grounded in
// `holo_daemon::main`/`config` without the gRPC/YANG northbound machinery
// (explicitly out of scope per spec.md Section 1).

fn init_tracing(logging: &config::Logging) {
    if !logging.enabled {
        return;
    }

    let env_filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let layer = tracing_subscriber::fmt::layer().with_target(true);
    let layer = match logging.style {
        LoggingStyle::Compact => layer.compact().boxed(),
        LoggingStyle::Full => layer.boxed(),
        LoggingStyle::Json => layer.json().boxed(),
        LoggingStyle::Pretty => layer.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}

#[tokio::main]
async fn main() {
    let matches = Command::new("bfdd")
        .version(clap::crate_version!())
        .about("Bidirectional Forwarding Detection daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Specify an alternative configuration file"),
        )
        .get_matches();

    let config_file = matches.get_one::<String>("config").map(String::as_str);
    let config = Config::load(config_file);

    init_tracing(&config.logging);
    info!("starting up");

    let clock = Arc::new(TokioClock);
    let sender = Arc::new(UdpPacketSender::new());
    let observer = Arc::new(NullMetricsObserver);
    let unsolicited_policy = config.unsolicited.map(config::Unsolicited::into_policy);

    let manager = Arc::new(Manager::new(
        clock,
        sender,
        observer,
        config.event_bus_capacity,
        unsolicited_policy,
    ));

    if let Err(error) = manager.reconcile(config.sessions) {
        error.log();
        std::process::exit(1);
    }

    let transport = bfdd_transport::UdpTransport::new(manager.clone());
    let rx_handles = transport.spawn();

    wait_for_shutdown_signal().await;
    info!("shutting down");

    manager.drain_all().await;
    tokio::time::sleep(Duration::from_millis(config.drain_timeout_ms)).await;

    for handle in rx_handles {
        handle.abort();
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
