#![forbid(unsafe_code)]

use anyhow::Result;
use callify_server::config::{Args, ServerConfig};
use callify_server::metrics::{start_metrics_server, HealthState};
use callify_server::run_with_shutdown;
use callify_server::server::ServerState;
use callify_server::store::{FileStore, MemoryStore, RoomStore};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callify_server=info"));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config: ServerConfig = args.into();
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let store: Arc<dyn RoomStore> = match &config.store_dir {
        Some(dir) => {
            let store = FileStore::open(dir).await?;
            info!("room records stored in {}", store.dir().display());
            Arc::new(store)
        }
        None => {
            warn!("no store directory configured, chat history is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(ServerState::new(config.clone(), store));
    let health_state = HealthState::new(Arc::clone(&state.registry));

    tokio::spawn({
        let health_state = health_state.clone();
        let metrics_addr = config.metrics_addr;
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("received shutdown signal");
        health_state.set_ready(false);
    };

    run_with_shutdown(listener, state, shutdown).await?;
    Ok(())
}
