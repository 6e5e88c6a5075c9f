use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use storm_blocker::{Monitor, StormConfig};

#[derive(Debug, Parser)]
#[command(name = "storm-blocker", version, about = "Traffic admission and DDoS protection engine")]
struct Cli {
    /// YAML configuration file; `STORM__*` environment variables override it
    #[arg(short, long, global = true, env = "STORM_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the engine with periodic housekeeping until interrupted
    Run,
    /// Feed synthetic requests through the pipeline and print the outcome
    Simulate {
        #[arg(long)]
        site: String,
        /// Client address; omit to simulate requests without one
        #[arg(long)]
        ip: Option<String>,
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long, default_value = "/test")]
        path: String,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = StormConfig::load(cli.config.as_deref())?;
    info!(
        sites = config.sites.len(),
        networks = config.resolver.networks.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Run => run(&config).await,
        Command::Simulate {
            site,
            ip,
            count,
            path,
        } => simulate(&config, &site, ip.as_deref(), count, &path).await,
        Command::CheckConfig => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: &StormConfig) -> anyhow::Result<()> {
    info!("Starting Storm Blocker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let monitor = Monitor::from_config(config)?;
    if monitor.state().sites.is_empty() {
        warn!("No sites configured; every request would be rejected as unknown");
    }
    info!(sites = monitor.state().sites.len(), "Storm Blocker running");

    shutdown_signal().await;

    monitor.shutdown().await;
    let stats = monitor.stats();
    info!(
        decisions = stats.decisions,
        denied = stats.denied,
        attacks = stats.attacks_detected,
        "Storm Blocker stopped"
    );
    Ok(())
}

async fn simulate(
    config: &StormConfig,
    site: &str,
    ip: Option<&str>,
    count: usize,
    path: &str,
) -> anyhow::Result<()> {
    let monitor = Monitor::from_config(config)?;
    let decisions = monitor.simulate_traffic(site, ip, count, Some(path)).await;
    monitor.shutdown().await;
    let decisions = decisions?;

    let admitted = decisions.iter().filter(|d| d.admit).count();
    info!(
        site = %site,
        requests = decisions.len(),
        admitted,
        denied = decisions.len() - admitted,
        "Simulation finished"
    );

    let report = serde_json::json!({
        "decisions": decisions,
        "summary": monitor.traffic_summary(site).await?,
        "blocked_ips": monitor.blocked_ips(site)?,
        "stats": monitor.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
