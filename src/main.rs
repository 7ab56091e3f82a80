use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zonecentral::{
    backend::NotifyTransport,
    central::{CentralOptions, CentralService},
    config::CentralConfig,
    graceful_shutdown::GracefulShutdown,
    http_server::HttpServer,
    metrics::CentralMetrics,
    model::RequestContext,
    pool_manager::{PoolManager, PoolManagerHandle},
    rpc::{self, RpcOutcome, RpcServer},
    serial::SerialManager,
    storage::{MemoryStorage, Storage},
};

/// Authoritative zone management service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the health and metrics endpoints
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => CentralConfig::load(path)?,
        None => CentralConfig::from_env()?,
    };
    if let Some(addr) = args.http_addr {
        config.http_bind_addr = Some(addr);
    }
    config.validate()?;

    info!(
        "Starting zonecentral: {} pool(s), serial scheme {:?}, rpc timeout {:?}",
        config.pools.len(),
        config.serial_scheme,
        config.rpc_timeout
    );

    let metrics = Arc::new(CentralMetrics::new()?);
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let shutdown = GracefulShutdown::new(Duration::from_secs(5));

    // Propagation
    let (handle, requests) = PoolManagerHandle::channel(config.propagation.queue_size);
    let transport = Arc::new(NotifyTransport::new(config.propagation.target_timeout));
    let pool_manager = Arc::new(
        PoolManager::new(storage.clone(), transport, &config, handle.clone())
            .with_metrics(metrics.clone()),
    );
    let task = tokio::spawn(pool_manager.run(requests, shutdown.subscribe()));
    shutdown.register_task("pool manager", task).await;

    // Central service behind the RPC gateway
    let central = Arc::new(
        CentralService::new(
            storage.clone(),
            SerialManager::new(config.serial_scheme),
            handle.clone(),
            CentralOptions::from(&config),
        )
        .with_metrics(metrics.clone()),
    );
    let (client, calls) = rpc::channel(config.rpc_queue_size, config.rpc_timeout);
    let client = client.with_metrics(metrics.clone());
    let server = Arc::new(RpcServer::new(central, config.rpc_workers).with_metrics(metrics.clone()));
    let task = tokio::spawn(server.run(calls, shutdown.subscribe()));
    shutdown.register_task("rpc server", task).await;

    if let Some(addr) = config.http_bind_addr {
        let http = HttpServer::new(storage.clone(), metrics.clone(), handle.clone(), addr);
        let shutdown_rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            if let Err(e) = http.start(shutdown_rx).await {
                error!("HTTP server error: {}", e);
            }
        });
        shutdown.register_task("http server", task).await;
    } else {
        info!("HTTP server disabled");
    }

    let probe = RequestContext::admin("zonecentral").with_all_tenants();
    match client.count_domains(&probe).await {
        RpcOutcome::Ok(count) => info!("Central service ready, {} zone(s) loaded", count),
        RpcOutcome::Timeout => warn!("Central service did not answer the startup probe"),
        RpcOutcome::Error(e) => error!("Central service startup probe failed: {}", e),
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");

    drop(client);
    shutdown.shutdown().await;
    Ok(())
}
