use anyhow::Context;
use clap::Parser;
use devdocs_proxy::{metrics, ProxyConfig, ProxyServer};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Serve a documentation site on localhost for an embedded web view.
#[derive(Parser, Debug)]
#[command(name = "devdocs-proxy", author, version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "DEVDOCS_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream URL (overrides the config file)
    #[arg(short, long)]
    target: Option<String>,

    /// Loopback port to listen on, 0 for ephemeral (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request the mobile layout
    #[arg(short, long)]
    mobile: bool,

    /// Serve Prometheus metrics on this loopback port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.context("Failed to initialize tracing subscriber")
}

fn load_config(args: &Args) -> anyhow::Result<ProxyConfig> {
    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(target) = &args.target {
        config.target_url = target.clone();
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if args.mobile {
        config.mobile_mode = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json)?;

    let config = load_config(&args)?;

    if let Some(port) = args.metrics_port {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(addr).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    let proxy = ProxyServer::new();
    let addr = proxy.start(config).await?;
    info!("devdocs-proxy ready on http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    proxy.deactivate().await;

    Ok(())
}
