/*
 *  main.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Entry point: CLI, logging, remote server, supervisor and signals
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use anyhow::{Context, anyhow};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};

use infocube::BUILD_DATE;
use infocube::config::{self, Cli, Config};
use infocube::display::{BoxedSurface, HeadlessSurface};
use infocube::remote::{RunCommand, SharedState, server};
use infocube::supervisor::{SurfaceFactory, Supervisor};

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let (config, store) = config::load(&cli).context("loading configuration")?;
    let bind = config.remote.bind.clone();
    info!(
        "Panel {}x{}, plugins: {}",
        config.matrix.width(),
        config.matrix.height(),
        config.plugins.enabled.join(", ")
    );
    let shared = SharedState::new(config, Some(store));

    // the display runs without the remote side when the port is taken
    let server = match server::bind(&bind).await {
        Ok(listener) => Some(tokio::spawn(server::serve(listener, shared.remote()))),
        Err(e) => {
            warn!("Remote command server disabled, cannot bind {}: {}", bind, e);
            None
        }
    };

    let snapshot = cli.snapshot.clone();
    let snapshot_every = cli.snapshot_every;
    let factory: SurfaceFactory = Box::new(move |_config: &Config| {
        let surface = match snapshot.as_ref() {
            Some(path) => HeadlessSurface::new().with_snapshot(path.clone(), snapshot_every),
            None => HeadlessSurface::new(),
        };
        Box::new(surface) as BoxedSurface
    });
    let mut display = tokio::spawn(Supervisor::new(shared.clone(), factory).run());

    let finished = tokio::select! {
        res = &mut display => Some(res),
        _ = async {
            if let Err(e) = signal_handler().await {
                // keep running without them
                error!("Signal handling failed: {}", e);
                std::future::pending::<()>().await;
            }
        } => None,
    };
    let outcome = match finished {
        Some(res) => res,
        None => {
            shared.remote().request(RunCommand::Shutdown);
            display.await
        }
    };

    if let Some(server) = server {
        server.abort();
    }

    match outcome {
        Ok(Ok(())) => {
            info!("Shut down cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Display loop failed: {}", e);
            Err(e).context("display loop")
        }
        Err(e) => Err(anyhow!("display task aborted: {e}")),
    }
}
