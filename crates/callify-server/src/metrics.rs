use crate::registry::Registry;
use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    sessions: usize,
    rooms: usize,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// State shared with the health endpoints.
///
/// Readiness flips to `false` once the coordinator starts draining.
#[derive(Clone)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
    registry: Arc<Registry>,
}

impl HealthState {
    /// Create a ready health state reporting on `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            registry,
        }
    }

    /// Mark the service as ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Build the `/metrics`, `/health` and `/ready` routes.
///
/// `/metrics` is only mounted when a Prometheus recorder was installed.
pub fn health_router(
    health_state: HealthState,
    prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler));
    let router = match prometheus {
        Some(handle) => router.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        ),
        None => router,
    };
    router.with_state(health_state)
}

/// Install the Prometheus recorder and serve the operational endpoints.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let app = health_router(health_state, Some(handle));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Liveness: 200 while the process runs, with a presence summary.
async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            timestamp: Utc::now(),
            sessions: state.registry.len(),
            rooms: state.registry.room_count(),
        }),
    )
}

/// Readiness: 200 while accepting connections, 503 while draining.
async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "draining",
                ready: false,
            }),
        )
    }
}

/// Connection and session gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("callify_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("callify_connections_active").decrement(1.0);
    }

    /// Record the number of joined sessions.
    pub fn sessions_active(count: usize) {
        metrics::gauge!("callify_sessions_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Count one decoded inbound envelope of the given event kind.
    pub fn envelopes_received_total(event: &'static str) {
        metrics::counter!("callify_envelopes_received_total", "event" => event).increment(1);
    }

    /// Count one queued outbound envelope of the given event kind.
    pub fn envelopes_sent_total(event: &'static str) {
        envelopes_sent_total_by(event, 1);
    }

    /// Count `n` queued outbound envelopes of the given event kind.
    pub fn envelopes_sent_total_by(event: &'static str, n: u64) {
        metrics::counter!("callify_envelopes_sent_total", "event" => event).increment(n);
    }

    /// Count a refused WebSocket handshake with the given reason label.
    pub fn handshakes_rejected_total(reason: &'static str) {
        metrics::counter!("callify_handshakes_rejected_total", "reason" => reason).increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("callify_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Count an inbound frame that failed to decode.
    pub fn protocol_errors_total() {
        metrics::counter!("callify_protocol_errors_total").increment(1);
    }

    /// Count a targeted signal whose destination peer was not in the room.
    pub fn routing_misses_total() {
        metrics::counter!("callify_routing_misses_total").increment(1);
    }

    /// Count a targeted signal whose destination peer id matched several connections.
    pub fn duplicate_peer_total() {
        metrics::counter!("callify_duplicate_peer_total").increment(1);
    }

    /// Record a chat persistence attempt with the given outcome label.
    pub fn chat_persist_total(outcome: &'static str) {
        metrics::counter!("callify_chat_persist_total", "outcome" => outcome).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the time spent handling one inbound envelope, in seconds.
    pub fn handle_latency_seconds(value: f64) {
        metrics::histogram!("callify_handle_latency_seconds").record(value);
    }

    /// Record one chat persistence round trip, in seconds.
    pub fn store_latency_seconds(value: f64) {
        metrics::histogram!("callify_store_latency_seconds").record(value);
    }
}
