//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use ibsm_sm::instance::{ExitReason, SubnetManager};
use ibsm_sm::transport::loopback::LoopbackTransport;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.show_thread_id)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ibsm=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("InfiniBand subnet manager daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("guid")
                .short("g")
                .long("guid")
                .value_name("guid")
                .help("Bind to the port with the given GUID."),
        )
        .arg(
            Arg::with_name("priority")
                .short("p")
                .long("priority")
                .value_name("prio")
                .help("SM priority used during election (0-15)."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let mut config = Config::load(config_file);
    if let Some(guid) = matches.value_of("guid") {
        match guid.parse() {
            Ok(guid) => config.sm.port_guid = guid,
            Err(_) => {
                eprintln!("invalid port GUID: {}", guid);
                std::process::exit(4);
            }
        }
    }
    if let Some(priority) = matches.value_of("priority") {
        match priority.parse::<u8>() {
            Ok(priority) if priority <= 15 => {
                config.sm.sm_priority = priority;
            }
            _ => {
                eprintln!("invalid SM priority: {}", priority);
                std::process::exit(4);
            }
        }
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    let exit_code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config));
    std::process::exit(exit_code);
}

async fn run(config: Config) -> i32 {
    // The bundled backend emulates the local HCA port; production
    // transports implement the same seam out of tree.
    let mut transport = LoopbackTransport::new(
        config.transport.node_guid,
        config.transport.port_guid,
    );

    // Bind the transport and assemble the subnet manager.
    let (tx, channels_rx) = SubnetManager::protocol_input_channels();
    let mut sm = match SubnetManager::new(config.sm, &mut transport, tx) {
        Ok(sm) => sm,
        Err(error) => {
            error!(%error, "initialization failed");
            return 3;
        }
    };

    // Forward termination signals into the event loop.
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = sigterm.recv() => (),
        }
        info!("shutting down");
        let _ = shutdown_tx.send(());
    });

    let reason = sm.event_loop(channels_rx, shutdown_rx).await;
    sm.shutdown(&mut transport);

    match reason {
        ExitReason::Shutdown => 0,
        ExitReason::FatalDuplicateGuid => 2,
    }
}
