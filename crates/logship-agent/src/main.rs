// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::{env, path::PathBuf, process};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logship::{config::Config, runner::TargetRunner};

#[derive(Parser)]
#[command(name = "logship-agent")]
#[command(about = "Tails engine log files and ships every record to a collector")]
#[command(version)]
struct Cli {
    /// Path of the JSON configuration file.
    #[arg(long, env = "LOGSHIP_CONFIG")]
    conf: PathBuf,
}

#[tokio::main]
pub async fn main() {
    let cli = Cli::parse();

    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_file(&cli.conf) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {}", cli.conf.display(), e);
            process::exit(1);
        }
    };
    info!(
        "Shipping {} targets to {}",
        config.targets.len(),
        config.sink.endpoint
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    let runner = TargetRunner::new(&config);
    if let Err(e) = runner.run(&cancel).await {
        error!("{}", e);
        process::exit(1);
    }
    info!("Shut down cleanly");
}

#[cfg(unix)]
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {}", e);
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down");
            cancel.cancel();
        }
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
