//! tlsgate - main entry point
//!
//! TLS-terminating proxy with on-demand ACME certificates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tlsgate_config::Config;
use tlsgate_proxy::acme::{CertificateManager, InstantAcmeClient};
use tlsgate_proxy::{ConnectionTracker, TlsFrontend};

/// tlsgate - TLS proxy with on-demand ACME certificates
#[derive(Parser, Debug)]
#[command(name = "tlsgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "TLSGATE_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test,
    /// Run the proxy (default)
    Run,
}

const DEFAULT_CONFIG_PATH: &str = "/etc/tlsgate/config.kdl";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli
        .config
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    match cli.command {
        Some(Commands::Test) => test_config(&config_path),
        Some(Commands::Run) | None => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(run_server(&config_path))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: &str) -> Result<Config> {
    info!("Loading configuration from: {}", path);
    let config = Config::from_file(path).context("Failed to load configuration file")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Test configuration file and exit
fn test_config(path: &str) -> Result<()> {
    let config = load_config(path)?;

    info!("Configuration test successful:");
    info!("  - listen on {}", config.server.listen);
    info!("  - ACME directory {}", config.acme.directory_url());
    info!("  - {} backend host(s)", config.backends.hosts.len());
    if config.acme.allowed_domains.is_empty() {
        info!("  - any domain allowed");
    } else {
        info!("  - {} allowed domain(s)", config.acme.allowed_domains.len());
    }

    println!("tlsgate: configuration file {} test is successful", path);
    Ok(())
}

/// Run the proxy until SIGINT or SIGTERM
async fn run_server(path: &str) -> Result<()> {
    let config = load_config(path)?;

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let client = InstantAcmeClient::from_config(&config.acme)
        .await
        .context("Failed to set up ACME account")?;
    let manager = CertificateManager::new(Arc::new(client), &config.acme);

    let tracker = ConnectionTracker::new(Duration::from_secs(
        config.server.graceful_shutdown_timeout_secs,
    ));
    let frontend = TlsFrontend::new(
        manager.clone(),
        config.backends.clone(),
        tracker.clone(),
        Duration::from_secs(config.server.backend_connect_timeout_secs),
    );

    let addr = config.server.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { frontend.serve(listener, shutdown).await }
    });

    info!("tlsgate started successfully");

    wait_for_signal().await?;
    info!(
        active_connections = tracker.active_count(),
        "Received shutdown signal, initiating graceful shutdown"
    );

    shutdown.cancel();
    server
        .await
        .context("Listener task panicked")?
        .context("Listener failed")?;

    if !tracker.wait_for_drain().await {
        warn!("Shutting down with connections still open");
    }
    manager.shutdown();

    info!("tlsgate stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
