use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
#[cfg(not(unix))]
use tracing::warn;
use tracing_subscriber::EnvFilter;

use countgate::config::CountgateConfig;
use countgate::gateway::HttpServer;
use countgate::ratelimit::{LimitCountFilter, RedisCounterStore};

/// Log output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Distributed limit-count admission control backed by Redis.
#[derive(Debug, Parser)]
#[command(name = "countgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "COUNTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<std::net::SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }

    let signals = StopSignals::install()?;
    info!("Starting countgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = CountgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let compiled = config.limiter.compile()?;

    let store = RedisCounterStore::connect(&config.store.url, config.store.timeout()).await?;
    let filter = Arc::new(LimitCountFilter::new(compiled, Arc::new(store)));

    HttpServer::new(config.server.http_addr, filter)
        .serve_with_shutdown(shutdown_signal(signals))
        .await?;

    info!("countgate stopped");
    Ok(())
}

/// Process signals that stop the gateway.
struct StopSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl StopSignals {
    /// Register handlers now so a stop sent during startup is not lost.
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next stop request and name the signal that sent it.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            Ok(()) = signal::ctrl_c() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
        "SIGINT"
    }
}

async fn shutdown_signal(mut signals: StopSignals) {
    let signal = signals.recv().await;
    info!(signal, "Stop requested, draining in-flight admissions");
}
