use anyhow::Result;
use clap::Parser;
use modelgate::llm::loopback::{LoopbackClient, LoopbackOauth};
use modelgate::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modelgate")]
#[command(about = "A model gateway daemon: alias routing, failover, streams", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the IPC socket path from the config file.
    #[arg(long, value_name = "PATH")]
    socket: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    if let Some(socket) = cli.socket {
        config.ipc.socket_path = socket;
    }

    init_logging(&config.logging.level, &config.logging.format)?;

    tracing::info!("ModelGate starting...");
    if config_path.exists() {
        tracing::info!("Config loaded from: {}", config_path.display());
    } else {
        tracing::info!("No config file found, using defaults");
    }

    // The loopback pair stands in until real provider clients are wired up
    // by an embedding binary.
    let client = Arc::new(LoopbackClient::new());
    let oauth = Arc::new(LoopbackOauth);

    tokio::select! {
        result = modelgate::run(config, client, oauth) => result,
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
