use std::{future::Future, time::Duration};

use clap::Parser;
use color_eyre::Result;
use serial_bridge::{cli, config::Config, error::Error, logging, mock, server::Bridge};
use tracing::{debug, info, warn, Level};

/// Waits for the signal, or forever if it could not be listened for.
#[cfg_attr(not(unix), allow(dead_code))]
async fn signalled<F: Future>(listening: std::io::Result<F>, signal: &str) {
    match listening {
        Ok(received) => {
            received.await;
        }
        Err(e) => {
            warn!(?e, "Could not listen for {signal}, ignoring it");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};

    let listening = signal(SignalKind::hangup()).map(|mut hangups| async move {
        hangups.recv().await;
    });

    signalled(listening, "SIGHUP").await
}

#[cfg(not(unix))]
async fn hangup() {
    std::future::pending().await
}

async fn serve(bridge: &Bridge, cli: &cli::Cli) -> Result<(), Error> {
    match &cli.replay {
        Some(path) => {
            let lines = mock::replay(path, Duration::from_millis(cli.replay_interval_ms))?;
            bridge.serve(lines, None).await
        }
        None => bridge.serve_device().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command.clone() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);

    let bridge = Bridge::new(config)?;

    let serving = serve(&bridge, &cli);
    tokio::pin!(serving);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = &mut serving => {
            logging::shutdown();
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    bridge.shutdown();

    if tokio::time::timeout(Duration::from_secs(2), serving).await.is_err() {
        warn!("Server did not stop in time");
    }

    logging::shutdown();

    Ok(())
}
