use thiserror::Error;

/// Errors that end a single client connection.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The server is already serving its maximum number of connections.
    #[error("connection limit reached")]
    AtCapacity,
}

/// Errors reported by a [`RoomStore`](crate::store::RoomStore).
///
/// None of these are fatal to the coordinator; a failed chat write is
/// reported to the sender as a warning.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store did not answer within the configured timeout.
    #[error("store timed out after {0} ms")]
    Timeout(u64),
    /// The room has no record to append to.
    #[error("room {0} does not exist")]
    MissingRoom(String),
    /// The store refused or could not process the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Filesystem error in a file-backed store.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored record could not be encoded or decoded.
    #[error("store record error: {0}")]
    Serde(#[from] serde_json::Error),
}
