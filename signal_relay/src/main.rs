//! Command-line entry point for the signaling relay

use anyhow::Context;
use clap::{Parser, ValueEnum};
use signal_relay::{RelayConfig, RelayServer};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "signal-relay")]
#[command(about = "Room-based WebSocket signaling relay")]
#[command(version)]
struct Cli {
    /// Address to bind to
    #[arg(short, long, env = "SIGNAL_RELAY_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, env = "SIGNAL_RELAY_PORT", default_value_t = signal_relay::config::DEFAULT_PORT)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long, env = "SIGNAL_RELAY_VERBOSE")]
    verbose: bool,

    /// Log output format
    #[arg(long, env = "SIGNAL_RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        "signal_relay=debug"
    } else {
        "signal_relay=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    match cli.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = RelayConfig::from_parts(&cli.bind, cli.port)
        .with_context(|| format!("invalid bind address {:?}", cli.bind))?;

    let server = RelayServer::bind(&config)
        .await
        .context("failed to start signaling relay")?;
    info!(
        "WebSocket signaling server running on ws://{}",
        server.local_addr()
    );

    server.run_until(shutdown_signal()).await?;
    info!("WebSocket server closed");
    Ok(())
}
