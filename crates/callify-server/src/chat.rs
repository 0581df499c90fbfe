//! Chat relay: live fan-out plus ordered background persistence.

use crate::error::StoreError;
use crate::fanout;
use crate::metrics::{counters, histograms};
use crate::registry::ConnHandle;
use crate::server::ServerState;
use crate::store::RoomStore;
use callify_common::envelope::{ChatBroadcast, ChatSend, Notice};
use callify_common::types::RoomMetadata;
use callify_common::{ChatMessage, ServerEvent};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One chat message waiting to be written.
#[derive(Debug)]
struct PersistJob {
    room_id: String,
    owner_id: String,
    message: ChatMessage,
    sender: ConnHandle,
}

/// Queue in front of the store for chat history.
///
/// A single worker drains the queue, so messages are appended in the order
/// they were queued. Stamping and queueing happen under one lock and stamps
/// never go backwards, so the stored history is ordered by time as well.
/// Each write is bounded by the store timeout; a failed or refused write is
/// reported to the sender as a warning.
#[derive(Debug, Clone)]
pub struct ChatPersister {
    tx: mpsc::Sender<PersistJob>,
    last_stamp: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ChatPersister {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn RoomStore>, timeout: Duration, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<PersistJob>(capacity);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let PersistJob {
                    room_id,
                    owner_id,
                    message,
                    sender,
                } = job;
                if let Err(e) = persist_chat(store.as_ref(), &room_id, &owner_id, message, timeout).await
                {
                    tracing::warn!(room = %room_id, conn = %sender.id, error = %e, "chat message not persisted");
                    warn_sender(&sender, &e);
                }
            }
            tracing::debug!("chat persister stopped");
        });
        Self {
            tx,
            last_stamp: Arc::new(Mutex::new(None)),
        }
    }

    /// Stamp a message and queue it for the store in one step.
    ///
    /// The stamp is never earlier than the previous one. Returns the stamped
    /// message whether or not the queue accepted it.
    pub fn stamp_and_queue(
        &self,
        room_id: &str,
        owner_id: String,
        sender_name: String,
        text: String,
        sender: &ConnHandle,
    ) -> ChatMessage {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let mut message = ChatMessage::stamped(sender_name, text);
        if let Some(previous) = *last {
            message.time = message.time.max(previous);
        }
        *last = Some(message.time);

        let queued = self.tx.try_send(PersistJob {
            room_id: room_id.to_string(),
            owner_id,
            message: message.clone(),
            sender: sender.clone(),
        });
        drop(last);

        match queued {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                counters::chat_persist_total("queue_full");
                tracing::warn!(room = %job.room_id, "chat persistence queue full");
                warn_sender(&job.sender, &"persistence queue is full");
            }
            Err(TrySendError::Closed(job)) => {
                counters::chat_persist_total("stopped");
                warn_sender(&job.sender, &"persistence is unavailable");
            }
        }
        message
    }
}

fn warn_sender(sender: &ConnHandle, reason: &dyn std::fmt::Display) {
    let notice = ServerEvent::Warning(Notice::chat_not_persisted(reason));
    fanout::send_to(sender.id, &sender.outbox, &notice);
}

/// Stamp a chat message, queue it for persistence and relay it to the rest
/// of the room.
///
/// Returns how many participants the message was relayed to. The relay never
/// waits on the store.
pub fn handle_chat(state: &ServerState, conn: &ConnHandle, chat: ChatSend) -> usize {
    let ChatSend {
        room,
        displayname,
        message: text,
        uuid,
    } = chat;

    let sender_peer =
        uuid.or_else(|| state.registry.lookup_by_connection(conn.id).map(|s| s.peer_id));
    let owner_id = sender_peer.clone().unwrap_or_else(|| displayname.clone());
    let message =
        state
            .chat_persister
            .stamp_and_queue(&room, owner_id, displayname.clone(), text.clone(), conn);

    let event = ServerEvent::ChatMessage(ChatBroadcast {
        room: room.clone(),
        uuid: sender_peer,
        displayname,
        message: text,
        time: message.time,
    });
    let recipients = state.registry.recipients(&room, Some(conn.id));
    let relayed = fanout::fan_out(&recipients, &event);
    tracing::debug!(room = %room, conn = %conn.id, relayed, "chat message relayed");
    relayed
}

/// Create the room record if needed and append `message`, bounded by `timeout`.
///
/// # Errors
///
/// Returns [`StoreError::Timeout`] when the store does not answer in time, or
/// the store's own error.
pub async fn persist_chat(
    store: &dyn RoomStore,
    room_id: &str,
    owner_id: &str,
    message: ChatMessage,
    timeout: Duration,
) -> Result<(), StoreError> {
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, async {
        store
            .upsert_room_if_absent(room_id, RoomMetadata::placeholder(owner_id))
            .await?;
        store.append_chat(room_id, message).await
    })
    .await
    .unwrap_or_else(|_| Err(StoreError::Timeout(timeout.as_millis() as u64)));

    histograms::store_latency_seconds(start.elapsed().as_secs_f64());
    counters::chat_persist_total(if result.is_ok() { "ok" } else { "failed" });
    result
}
