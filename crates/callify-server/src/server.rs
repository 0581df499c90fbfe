use crate::chat::ChatPersister;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::CoordinatorError;
use crate::registry::{ConnectionId, Registry};
use crate::store::RoomStore;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long in-flight connections get to close after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending chat writes before new ones are refused with a warning.
const CHAT_QUEUE_CAPACITY: usize = 1024;

/// Shared state for the coordinator, passed to every connection task.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Live sessions and room membership.
    pub registry: Arc<Registry>,
    /// Room and chat history persistence.
    pub store: Arc<dyn RoomStore>,
    /// Background writer for chat history.
    pub chat_persister: ChatPersister,
    /// Number of open WebSocket connections.
    pub active_connections: AtomicUsize,
    next_conn_id: AtomicU64,
}

impl ServerState {
    /// Build the shared state and start the chat persistence worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        let chat_persister =
            ChatPersister::spawn(store.clone(), config.store_timeout(), CHAT_QUEUE_CAPACITY);
        Self {
            config,
            registry: Arc::new(Registry::new()),
            store,
            chat_persister,
            active_connections: AtomicUsize::new(0),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Run the accept loop until the listener fails.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), CoordinatorError> {
    run_with_shutdown(listener, state, std::future::pending()).await
}

/// Run the accept loop until `shutdown` completes.
///
/// On shutdown the loop stops accepting, asks every open connection to close,
/// and waits up to a bounded drain window for them to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CoordinatorError> {
    let local_addr = listener.local_addr().map_err(CoordinatorError::Io)?;
    info!("server listening on {}", local_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown_rx = shutdown_rx.clone();
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, shutdown_rx).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            () = &mut shutdown => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    drop(listener);
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            tasks.len()
        );
        tasks.abort_all();
    }

    info!("server shut down gracefully");
    Ok(())
}
