//! Callify coordinator: WebSocket signaling, presence and chat relay for
//! browser video meetings.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Chat relay and background chat persistence.
pub mod chat;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Participant disconnect handling.
pub mod disconnect;
/// Error types for coordinator operations.
pub mod error;
/// Non-blocking delivery onto connection outboxes.
pub mod fanout;
/// Prometheus metrics collection and health endpoints.
pub mod metrics;
/// Session and room membership registry.
pub mod registry;
/// Inbound envelope dispatch and signal routing.
pub mod router;
/// Accept loop and shared server state.
pub mod server;
/// Room record persistence.
pub mod store;
/// Whiteboard stroke relay.
pub mod whiteboard;

pub use server::{run, run_with_shutdown, ServerState};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::ServerConfig;
    use crate::error::StoreError;
    use crate::registry::ConnHandle;
    use crate::router;
    use crate::server::ServerState;
    use crate::store::{MemoryStore, RoomStore};
    use async_trait::async_trait;
    use callify_common::envelope::{ChatSend, Destination, Join, Negotiation, Signal};
    use callify_common::types::{RoomMetadata, RoomRecord};
    use callify_common::{ChatMessage, ServerEvent};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            allowed_origin: "http://localhost:3000".to_string(),
            store_dir: None,
            store_timeout_ms: 200,
            max_conns: 4,
            max_message_size: 64 * 1024,
            outbox_capacity: 32,
            ping_interval: 30,
            idle_timeout: 120,
        }
    }

    pub fn state() -> ServerState {
        state_with_store(Arc::new(MemoryStore::new()))
    }

    pub fn state_with_store(store: Arc<dyn RoomStore>) -> ServerState {
        ServerState::new(test_config(), store)
    }

    pub fn test_conn(state: &ServerState) -> (ConnHandle, mpsc::Receiver<String>) {
        let (outbox, rx) = mpsc::channel(state.config.outbox_capacity);
        (ConnHandle::new(state.next_connection_id(), outbox), rx)
    }

    /// Join `conn` to `room` and consume its join acknowledgement.
    pub fn join_room(
        state: &ServerState,
        conn: &ConnHandle,
        peer: &str,
        name: &str,
        room: &str,
        rx: &mut mpsc::Receiver<String>,
    ) {
        router::handle_join(
            state,
            conn,
            Join {
                uuid: peer.to_string(),
                display_name: name.to_string(),
                room: room.to_string(),
            },
        );
        match recv_event(rx) {
            ServerEvent::JoinSuccess(ack) => assert_eq!(ack.uuid, peer),
            other => panic!("expected join-success, got {other:?}"),
        }
    }

    pub fn recv_event(rx: &mut mpsc::Receiver<String>) -> ServerEvent {
        let text = rx.try_recv().expect("no envelope queued");
        serde_json::from_str(&text).expect("outbound envelope must decode")
    }

    pub fn chat(room: &str, name: &str, text: &str) -> ChatSend {
        ChatSend {
            room: room.to_string(),
            displayname: name.to_string(),
            message: text.to_string(),
            uuid: None,
        }
    }

    pub fn negotiation(kind: &str, from: &str, dest: &str, room: &str, payload: Value) -> Signal {
        let negotiation = Negotiation {
            uuid: from.to_string(),
            dest: Destination::try_from(dest.to_string()).unwrap(),
            room: room.to_string(),
            payload: payload.as_object().cloned().unwrap_or_default(),
        };
        match kind {
            "offer" => Signal::Offer(negotiation),
            "answer" => Signal::Answer(negotiation),
            "ice" => Signal::Ice(negotiation),
            other => panic!("not a negotiation kind: {other}"),
        }
    }

    /// Store that refuses every call.
    pub struct FailingStore;

    #[async_trait]
    impl RoomStore for FailingStore {
        async fn upsert_room_if_absent(&self, _: &str, _: RoomMetadata) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down for maintenance".into()))
        }

        async fn append_chat(&self, _: &str, _: ChatMessage) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down for maintenance".into()))
        }

        async fn get_room(&self, _: &str) -> Result<Option<RoomRecord>, StoreError> {
            Err(StoreError::Unavailable("down for maintenance".into()))
        }
    }

    /// Store that takes the given time to answer anything.
    pub struct SlowStore(pub Duration);

    #[async_trait]
    impl RoomStore for SlowStore {
        async fn upsert_room_if_absent(&self, _: &str, _: RoomMetadata) -> Result<(), StoreError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }

        async fn append_chat(&self, _: &str, _: ChatMessage) -> Result<(), StoreError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }

        async fn get_room(&self, _: &str) -> Result<Option<RoomRecord>, StoreError> {
            tokio::time::sleep(self.0).await;
            Ok(None)
        }
    }
}
