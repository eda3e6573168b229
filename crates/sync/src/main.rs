mod cli;
mod commands;
mod metrics;
mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ehdb_core::config::LoggingConfig;
use ehdb_core::{load_config, validate_config, Config, SanitizedConfig};

use cli::Cli;
use commands::{App, Job};
use scheduler::{run_scheduler, scheduled_jobs, JobRunner};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(cli, config).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> Result<Config> {
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(host) = cli.command.host() {
        config.crawler.host = host.to_string();
    }
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr so stdout
/// only carries run summaries.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config = ?SanitizedConfig::from(&config),
        config_hash = &config_hash[..16],
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown requested, cancelling the current run");
            cancel.cancel();
        });
    }

    let app = Arc::new(App::from_config(&config)?);

    match Job::from_command(&cli.command).await? {
        Some(job) => {
            let summary = app.run_job(&job, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            let jobs = scheduled_jobs(&config.scheduler);
            run_scheduler(app, jobs, cancel).await;
        }
    }

    if cli.print_metrics {
        print!("{}", metrics::render()?);
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
