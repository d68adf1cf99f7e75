use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sq_router::{
    AppState, EtcdDirectory, Forwarder, PartitionCache, RouterConfig, build_router,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sq-router")]
#[command(about = "Routes queue requests to the partition that should serve them")]
struct Cli {
    /// Comma separated etcd endpoints, overrides ETCD_HOSTS
    #[arg(long)]
    etcd_hosts: Option<String>,
    /// Listen port, overrides HTTP_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Listen host, overrides HTTP_HOST
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = RouterConfig::from_env().context("failed to load router configuration")?;
    if let Some(hosts) = cli.etcd_hosts.as_deref() {
        config = config.etcd_hosts(hosts);
    }
    if let Some(port) = cli.port {
        config = config.port(port);
    }
    if let Some(host) = cli.host.as_deref() {
        config = config.host(host);
    }
    config.validate()?;
    info!(etcd_hosts = ?config.etcd_hosts, decode_policy = %config.decode_policy, "starting sq-router");

    // No degraded mode: without the metadata store the router cannot route anything.
    let directory = EtcdDirectory::connect(config.etcd_config())
        .await
        .context("failed to connect to etcd")?;
    let cache = PartitionCache::with_timing(Arc::new(directory), config.cache_ttl, config.herd_window);
    let forwarder =
        Forwarder::new(&config.forward_config()).context("failed to build forwarding client")?;

    let app = build_router(AppState::new(Arc::new(cache), forwarder));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "sq-router started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("sq-router stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sq_router=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
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

    info!("closing server");
}
