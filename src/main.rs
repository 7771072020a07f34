use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use agent_plane::config::{Config, PlatformEndpoint};
use agent_plane::server::run_server;

#[derive(Parser)]
#[command(name = "agent-plane")]
#[command(about = "Agent orchestration and dispatch control plane")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value = "3100")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Virtual-machine platform API endpoint
    #[arg(long, default_value = "http://localhost:4001")]
    vm_endpoint: String,

    /// Managed-container-task platform API endpoint
    #[arg(long, default_value = "http://localhost:4002")]
    container_endpoint: String,

    /// Batch-job platform API endpoint
    #[arg(long, default_value = "http://localhost:4003")]
    batch_endpoint: String,

    /// Reconciliation sweep interval in seconds
    #[arg(long, default_value = "30")]
    reconcile_interval_secs: u64,

    /// Metrics collector interval in seconds
    #[arg(long, default_value = "30")]
    metrics_interval_secs: u64,

    /// Cost collector interval in seconds
    #[arg(long, default_value = "300")]
    cost_interval_secs: u64,

    /// Auto-revert to idle this many seconds after a chat exchange
    #[arg(long, default_value = "5")]
    chat_auto_idle_secs: u64,

    /// Upper bound in seconds on waiting for remote command output
    #[arg(long, default_value = "8")]
    command_output_bound_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let logs_dir = std::path::Path::new(".agent-plane/logs");
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter.clone()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    let config = Config {
        host: args.host,
        port: args.port,
        virtual_machine: PlatformEndpoint::new(
            args.vm_endpoint,
            std::env::var("AGENT_PLANE_VM_TOKEN").ok(),
        ),
        container: PlatformEndpoint::new(
            args.container_endpoint,
            std::env::var("AGENT_PLANE_CONTAINER_TOKEN").ok(),
        ),
        batch: PlatformEndpoint::new(
            args.batch_endpoint,
            std::env::var("AGENT_PLANE_BATCH_TOKEN").ok(),
        ),
        reconcile_interval: Duration::from_secs(args.reconcile_interval_secs),
        metrics_interval: Duration::from_secs(args.metrics_interval_secs),
        cost_interval: Duration::from_secs(args.cost_interval_secs),
        chat_auto_idle: Duration::from_secs(args.chat_auto_idle_secs),
        command_output_bound: Duration::from_secs(args.command_output_bound_secs),
        ..Config::default()
    };

    info!("Starting Agent Plane control server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Server: {}:{}", config.host, config.port);
    info!(
        "Platform credentials configured: {}",
        config.credentials_present()
    );

    run_server(config).await?;

    Ok(())
}
