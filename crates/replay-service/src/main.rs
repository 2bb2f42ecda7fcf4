//! # Replay Service
//!
//! Binary entry point. Loads configuration, initializes logging and runs
//! one CLI command against an in-process replay engine.

use anyhow::Context;
use clap::Parser;
use replay_core::{Kind, ReplayError, ReplayId, ReplayRequest, RequestHeaders};
use replay_service::config::load_config;
use replay_service::{Cli, Commands, LogFormat, LoggingConfig, ReplayApp, ServiceConfig, ServiceError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet; fall back to defaults to report.
            init_tracing(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration");
            std::process::exit(e.exit_code());
        }
    };
    init_tracing(&config.logging);

    if let Err(e) = run(cli.command, config).await {
        error!(error = %format!("{:#}", e), "Command failed");
        let exit_code = e
            .downcast_ref::<ServiceError>()
            .map(ServiceError::exit_code)
            .unwrap_or(1);
        std::process::exit(exit_code);
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

async fn run(command: Commands, config: ServiceConfig) -> anyhow::Result<()> {
    let app = ReplayApp::build(&config).await?;

    match command {
        Commands::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
                }
                let _ = shutdown_tx.send(true);
            });

            info!(queue = %config.queue_name, "Starting replay worker");
            app.run(shutdown_rx).await;
            info!("Replay worker stopped");
        }
        Commands::Replay {
            operation,
            kinds,
            replay_id,
            partition_id,
        } => {
            let mut request = ReplayRequest::new(operation).with_kinds(kinds);
            if let Some(replay_id) = replay_id {
                request = request.with_replay_id(replay_id);
            }
            let mut headers = RequestHeaders::new();
            if let Some(partition_id) = partition_id {
                headers.insert("data-partition-id", partition_id);
            }

            let submission = app
                .coordinator()
                .submit(request, &headers)
                .await
                .map_err(ServiceError::from)?;
            let status = app.drive_to_completion(submission).await?;
            print_json(&status)?;
        }
        Commands::Status { replay_id, kinds } => {
            let replay_id = ReplayId::new(replay_id)
                .map_err(|e| ServiceError::from(ReplayError::from(e)))?;
            let kinds = kinds
                .into_iter()
                .map(Kind::new)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ServiceError::from(ReplayError::from(e)))?;

            let status = app
                .status()
                .get_status_for_kinds(&replay_id, &kinds)
                .await
                .map_err(ServiceError::from)?;
            print_json(&status)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to render status")?;
    println!("{}", json);
    Ok(())
}
