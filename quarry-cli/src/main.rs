//! Quarry binary
//!
//! Wires configuration, the Connect client, the Prometheus registry,
//! and the querier together, and handles signals and shutdown.

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use quarry_client::ConnectClient;
use quarry_config::{ConfigLoader, LogFormat, LoggingConfig, QuarryConfig};
use quarry_querier::{PrometheusSink, Querier, SystemClock};
use quarry_resilience::ShutdownController;

#[derive(Parser)]
#[command(
    name = "quarry",
    author,
    version,
    about = "Synthetic query load generator for profiling backends"
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of the query service to probe
    #[arg(long)]
    url: Option<String>,

    /// Address the internal metrics server binds to
    #[arg(long)]
    addr: Option<String>,

    /// Polling interval, e.g. "10s" or "1m"
    #[arg(long)]
    interval: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load(cli.config.as_ref())
        .context("loading configuration")?;
    apply_cli_overrides(&mut config, &cli)?;
    config.validate_all().context("validating configuration")?;

    if cli.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    init_tracing(&config.logging);
    info!(
        target = %config.target.url,
        interval = %humantime::format_duration(config.probe.interval),
        "starting quarry"
    );

    let registry = prometheus::Registry::new();
    let sink = PrometheusSink::new(&registry).context("registering metrics")?;
    let client = ConnectClient::new(&config.target.url, config.target.timeout)
        .context("building query service client")?;

    let querier = Querier::new(
        Arc::new(client),
        Arc::new(sink),
        Arc::new(SystemClock),
        &config.probe,
    );

    let controller = ShutdownController::new();
    let querier_task = tokio::spawn(querier.run(controller.token()));

    let bind_address: SocketAddr = config
        .server
        .bind_address
        .parse()
        .context("parsing server bind address")?;
    let server_task = tokio::spawn(server::serve(
        bind_address,
        registry.clone(),
        controller.token(),
    ));

    wait_for_signal().await?;
    info!("signal received, shutting down");
    controller.shutdown();

    // A second signal skips the graceful drain.
    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        error!("second signal received, exiting immediately");
        std::process::exit(130);
    });

    querier_task.await.context("joining querier task")?;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "metrics server failed"),
        Err(err) => error!(%err, "metrics server panicked"),
    }

    info!("shutdown complete");
    Ok(())
}

/// CLI flags win over file and environment configuration.
fn apply_cli_overrides(config: &mut QuarryConfig, cli: &Cli) -> Result<()> {
    if let Some(url) = &cli.url {
        config.target.url = url.clone();
    }
    if let Some(addr) = &cli.addr {
        config.server.bind_address = addr.clone();
    }
    if let Some(interval) = &cli.interval {
        config.probe.interval = humantime::parse_duration(interval)
            .with_context(|| format!("invalid --interval '{interval}'"))?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level
            .parse()
            .map_err(|err: String| anyhow::anyhow!(err))
            .context("invalid --log-level")?;
    }
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.as_str()));

    match config.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for interrupt")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    Ok(())
}
