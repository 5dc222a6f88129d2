// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_detectd::cli::Args;
use dd_detectd::config::Config;
use dd_detectd::registry::Registry;
use dd_detectd::server::{self, AppState};
use dd_detectd::{names, shutdown};
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let log_level = config.log_level()?;
    simple_logger::init_with_level(log_level)?;
    info!(
        "dd-detectd starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let mut signals = shutdown::ShutdownSignals::install()?;
    config.validate()?;
    let darknet_root = config.darknet_root()?;
    let class_names = names::class_names(&config.data_cfg, &darknet_root)?;
    info!("loaded {} class name(s)", class_names.len());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("listening on {}", listener.local_addr()?);

    let registry = Arc::new(Registry::launch(&config)?);
    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        names: class_names,
        image_dir: config.image_dir()?,
    });

    let stop_serving = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, state, stop_serving.clone()));

    let result = tokio::select! {
        _ = signals.recv() => Ok(()),
        served = server => match served {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.context("HTTP server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("HTTP server panicked")),
        },
    };
    if let Err(ref e) = result {
        error!("{e:#}");
    }

    info!("dd-detectd shutting down");
    stop_serving.cancel();
    registry.shutdown().await;
    result
}
