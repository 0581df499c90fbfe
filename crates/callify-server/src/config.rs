use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Origin value that disables the transport origin check.
pub const ANY_ORIGIN: &str = "*";

/// CLI arguments for the signaling coordinator.
#[derive(Parser, Debug, Clone)]
#[command(name = "callify-server")]
#[command(about = "Callify signaling and presence coordinator")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on for WebSocket clients.
    #[arg(long, default_value = "0.0.0.0:5000", env = "CALLIFY_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics and health endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "CALLIFY_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Browser origin allowed to open WebSocket connections ("*" allows any).
    #[arg(long, default_value = "http://localhost:3000", env = "CALLIFY_ALLOWED_ORIGIN")]
    pub allowed_origin: String,
    /// Directory for room records. Rooms are kept in memory when unset.
    #[arg(long, env = "CALLIFY_STORE_DIR")]
    pub store_dir: Option<PathBuf>,
    /// Upper bound for one chat persistence round trip, in milliseconds.
    #[arg(long, default_value = "2000", env = "CALLIFY_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: u64,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "CALLIFY_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long, default_value = "262144", env = "CALLIFY_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,
    /// Pending outbound envelopes per connection before further ones are dropped.
    #[arg(long, default_value = "256", env = "CALLIFY_OUTBOX_CAPACITY")]
    pub outbox_capacity: usize,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "CALLIFY_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "CALLIFY_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "CALLIFY_JSON_LOGS")]
    pub json_logs: bool,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on for WebSocket clients.
    pub listen: SocketAddr,
    /// Socket address for the metrics and health endpoint.
    pub metrics_addr: SocketAddr,
    /// Browser origin allowed to open WebSocket connections.
    pub allowed_origin: String,
    /// Directory for room records, or `None` for the in-memory store.
    pub store_dir: Option<PathBuf>,
    /// Upper bound for one chat persistence round trip, in milliseconds.
    pub store_timeout_ms: u64,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Pending outbound envelopes per connection.
    pub outbox_capacity: usize,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.allowed_origin.trim().is_empty() {
            return Err("allowed_origin must not be empty".to_string());
        }

        if self.store_timeout_ms == 0 {
            return Err("store_timeout_ms must be greater than 0".to_string());
        }
        if self.store_timeout_ms > 60_000 {
            return Err("store_timeout_ms exceeds reasonable limit (60000 ms)".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        const MAX_ALLOWED_MESSAGE: usize = 16 * 1024 * 1024;
        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.max_message_size > MAX_ALLOWED_MESSAGE {
            return Err(format!(
                "max_message_size exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_MESSAGE
            ));
        }

        if self.outbox_capacity == 0 {
            return Err("outbox_capacity must be greater than 0".to_string());
        }
        if self.outbox_capacity > 65_536 {
            return Err("outbox_capacity exceeds reasonable limit (65536)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }
        if self.idle_timeout < self.ping_interval {
            return Err("idle_timeout cannot be shorter than ping_interval".to_string());
        }
        Ok(())
    }

    /// Store round-trip bound as a [`Duration`].
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Whether a handshake carrying `origin` may be upgraded.
    ///
    /// Clients that send no `Origin` header (native apps, tests) are accepted.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allowed_origin == ANY_ORIGIN => true,
            Some(origin) => origin.trim_end_matches('/') == self.allowed_origin.trim_end_matches('/'),
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            allowed_origin: args.allowed_origin,
            store_dir: args.store_dir,
            store_timeout_ms: args.store_timeout_ms,
            max_conns: args.max_conns,
            max_message_size: args.max_message_size,
            outbox_capacity: args.outbox_capacity,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
        }
    }
}
