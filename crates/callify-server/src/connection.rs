use crate::disconnect;
use crate::error::CoordinatorError;
use crate::metrics::{counters, gauges, histograms};
use crate::registry::ConnHandle;
use crate::router;
use crate::server::ServerState;
use callify_common::types::SUBPROTOCOL;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// One unit of the global connection limit, returned on drop.
struct ConnectionSlot {
    state: Arc<ServerState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<ServerState>) -> Option<Self> {
        let limit = state.config.max_conns;
        state
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Check the upgrade request: refuse foreign origins with 403 and echo the
/// Callify subprotocol when the client offers it.
fn authorize_handshake(
    req: &Request,
    mut resp: Response,
    state: &ServerState,
) -> Result<Response, ErrorResponse> {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        counters::handshakes_rejected_total("origin");
        tracing::debug!(origin = origin.unwrap_or(""), "rejecting handshake from foreign origin");
        let mut reject = ErrorResponse::new(Some("origin not allowed".to_string()));
        *reject.status_mut() = StatusCode::FORBIDDEN;
        return Err(reject);
    }

    let offered = req
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|list| list.split(',').map(str::trim).any(|p| p == SUBPROTOCOL));
    if offered {
        resp.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(SUBPROTOCOL),
        );
    }
    Ok(resp)
}

/// Pump frames between one WebSocket and the router until either side ends
/// or shutdown is signalled.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    outbox_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
    state: &ServerState,
    conn: &ConnHandle,
) -> Result<(), CoordinatorError> {
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_heard = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        router::handle_text(state, conn, &text);
                        histograms::handle_latency_seconds(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        counters::protocol_errors_total();
                        tracing::debug!(conn = %conn.id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            tracing::debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(CoordinatorError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(text) = outbox_rx.recv() => {
                ws_tx.send(Message::Text(text)).await?;
            }
            _ = ping_interval.tick() => {
                if last_heard.elapsed() >= idle_timeout {
                    tracing::debug!(conn = %conn.id, "idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    tracing::debug!("failed to send ping: {}", e);
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Serve one client from TCP accept to disconnect.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), CoordinatorError> {
    let Some(_slot) = ConnectionSlot::acquire(&state) else {
        counters::handshakes_rejected_total("capacity");
        tracing::warn!(addr = %peer_addr, limit = state.config.max_conns, "connection limit reached");
        return Err(CoordinatorError::AtCapacity);
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_message_size),
        max_frame_size: Some(state.config.max_message_size),
        ..WebSocketConfig::default()
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        |req: &Request, resp: Response| authorize_handshake(req, resp, &state),
        Some(ws_config),
    )
    .await?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<String>(state.config.outbox_capacity);
    let conn = ConnHandle::new(state.next_connection_id(), outbox);

    gauges::inc_connections_active();
    tracing::debug!(conn = %conn.id, addr = %peer_addr, "connection open");

    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut outbox_rx,
        &mut shutdown_rx,
        &state,
        &conn,
    )
    .await;

    disconnect::handle_disconnect(&state, conn.id);
    gauges::dec_connections_active();
    tracing::debug!(
        conn = %conn.id,
        secs = conn.connected_at.elapsed().as_secs(),
        "connection closed"
    );

    result
}
