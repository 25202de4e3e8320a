use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shovel_server::{serve, AppState, BufferLayer, JobRegistry, LogBuffer, ShovelConfig};
use shovel_transport::memory::InMemoryBroker;
use shovel_transport::BrokerError;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the shovel server (default)
    Run,
    /// Print the resolved configuration and exit
    CheckConfig,
}

fn init_tracing(buffer: Arc<LogBuffer>) {
    let filter = std::env::var("SHOVEL_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .with(BufferLayer { buffer })
        .init();
}

/// Creates the configured topics and subscriptions in a fresh broker.
fn provision_broker(cfg: &ShovelConfig) -> InMemoryBroker {
    let broker = InMemoryBroker::with_topic_retention(cfg.topic_retention);
    for topic in &cfg.topics {
        broker.create_topic(topic);
    }
    for (subscription, topic) in cfg.subscription_bindings() {
        broker.create_topic(&topic);
        match broker.create_subscription(&subscription, &topic) {
            Ok(_) => info!(%subscription, %topic, "subscription provisioned"),
            Err(BrokerError::AlreadyExists(name)) => {
                warn!(subscription = %name, "duplicate subscription in config ignored")
            }
            Err(err) => warn!(%subscription, error = %err, "failed to provision subscription"),
        }
    }
    broker
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
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
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match ShovelConfig::new(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Commands::CheckConfig) = &cli.command {
        return match serde_json::to_string_pretty(&cfg) {
            Ok(rendered) => {
                println!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to render configuration: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let logs = Arc::new(LogBuffer::new(cfg.log_buffer_size));
    init_tracing(Arc::clone(&logs));

    let bind_addr: SocketAddr = match format!("{}:{}", cfg.http_bind, cfg.http_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid bind address {}:{}: {err}", cfg.http_bind, cfg.http_port);
            return ExitCode::FAILURE;
        }
    };

    let broker = Arc::new(provision_broker(&cfg));
    let retention = NonZeroUsize::new(cfg.job_retention).unwrap_or(NonZeroUsize::MIN);
    let jobs = JobRegistry::with_retention(broker, cfg.relay(), retention);
    let state = AppState {
        jobs: jobs.clone(),
        logs,
    };

    if let Err(err) = serve(bind_addr, state, shutdown_signal()).await {
        error!("http server failed on {bind_addr}: {err}");
        return ExitCode::FAILURE;
    }

    info!(tracked = jobs.len(), "waiting for relay jobs to finish");
    jobs.wait_idle().await;
    ExitCode::SUCCESS
}
