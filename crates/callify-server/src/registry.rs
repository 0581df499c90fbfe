use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

/// Sending half of a connection's bounded queue of encoded outbound envelopes.
pub type Outbox = mpsc::Sender<String>;

/// Server-assigned identity of one live WebSocket connection.
///
/// Ids increase monotonically for the life of the process, so ordering by id
/// is ordering by connection age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The connection whose envelopes are being handled.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Identity of the connection.
    pub id: ConnectionId,
    /// Its own delivery queue, for replies.
    pub outbox: Outbox,
    /// When the WebSocket handshake completed.
    pub connected_at: Instant,
}

impl ConnHandle {
    /// Handle for a freshly accepted connection.
    #[must_use]
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            connected_at: Instant::now(),
        }
    }
}

/// A joined participant, one per live connection that has sent a join.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection the participant joined on.
    pub conn_id: ConnectionId,
    /// Client-chosen peer id.
    pub peer_id: String,
    /// Display name announced to the room.
    pub display_name: String,
    /// Room the participant is in. Fixed for the life of the session.
    pub room_id: String,
    /// Delivery queue of the participant's connection.
    pub outbox: Outbox,
}

/// One target of a fan-out, snapshotted from the registry.
#[derive(Debug, Clone)]
pub struct Recipient {
    /// Target connection.
    pub conn_id: ConnectionId,
    /// Target delivery queue.
    pub outbox: Outbox,
}

impl From<&Session> for Recipient {
    fn from(session: &Session) -> Self {
        Self {
            conn_id: session.conn_id,
            outbox: session.outbox.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Inner {
    fn detach(&mut self, conn_id: ConnectionId) -> Option<Session> {
        let session = self.sessions.remove(&conn_id)?;
        if let Some(members) = self.rooms.get_mut(&session.room_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(&session.room_id);
            }
        }
        Some(session)
    }

    fn room_sessions<'a>(&'a self, room_id: &str) -> impl Iterator<Item = &'a Session> + 'a {
        self.rooms
            .get(room_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id))
    }
}

/// Connection registry: live connection id → participant session, with a
/// room index for fan-out.
///
/// Every operation runs under one mutex. Critical sections are short map
/// edits and snapshots; callers send to the returned outboxes after the guard
/// is released.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite the session of `session.conn_id`.
    ///
    /// Last write wins. Returns the replaced session, which may belong to a
    /// different room. Duplicate peer ids are accepted.
    pub fn register(&self, session: Session) -> Option<Session> {
        let mut inner = self.lock();
        let previous = inner.detach(session.conn_id);
        inner
            .rooms
            .entry(session.room_id.clone())
            .or_default()
            .insert(session.conn_id);
        inner.sessions.insert(session.conn_id, session);
        previous
    }

    /// Session registered for a connection, if any.
    #[must_use]
    pub fn lookup_by_connection(&self, conn_id: ConnectionId) -> Option<Session> {
        self.lock().sessions.get(&conn_id).cloned()
    }

    /// Connections in `room_id` registered under `peer_id`, oldest first.
    ///
    /// More than one match means clients reused a peer id; that is reported,
    /// not rejected.
    #[must_use]
    pub fn lookup_by_peer(&self, room_id: &str, peer_id: &str) -> Vec<ConnectionId> {
        self.peer_recipients(room_id, peer_id)
            .into_iter()
            .map(|r| r.conn_id)
            .collect()
    }

    /// Delivery targets for `peer_id` in `room_id`, oldest connection first.
    #[must_use]
    pub fn peer_recipients(&self, room_id: &str, peer_id: &str) -> Vec<Recipient> {
        self.lock()
            .room_sessions(room_id)
            .filter(|s| s.peer_id == peer_id)
            .map(Recipient::from)
            .collect()
    }

    /// Connections currently joined to `room_id`.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> BTreeSet<ConnectionId> {
        self.lock().rooms.get(room_id).cloned().unwrap_or_default()
    }

    /// Snapshot of every member of `room_id` except `except`.
    #[must_use]
    pub fn recipients(&self, room_id: &str, except: Option<ConnectionId>) -> Vec<Recipient> {
        self.lock()
            .room_sessions(room_id)
            .filter(|s| Some(s.conn_id) != except)
            .map(Recipient::from)
            .collect()
    }

    /// Remove the session of `conn_id`. Removing an unknown connection is a no-op.
    pub fn remove(&self, conn_id: ConnectionId) -> Option<Session> {
        self.lock().detach(conn_id)
    }

    /// Number of joined sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Returns `true` if nobody is joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}
