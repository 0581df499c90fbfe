//! Signal router: turns one inbound frame into registry updates and outbound
//! envelopes.

use crate::metrics::{counters, gauges};
use crate::registry::{ConnHandle, Session};
use crate::server::ServerState;
use crate::{chat, disconnect, fanout, whiteboard};
use callify_common::envelope::{Destination, Join, JoinSuccess, Notice, Signal};
use callify_common::{ClientEvent, ServerEvent};

/// What happened to a negotiation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sent to every other room member; holds the number reached.
    Broadcast(usize),
    /// Sent to the single connection registered under the destination peer id.
    Delivered,
    /// The destination peer id is registered on several connections; the
    /// oldest one got the signal. Holds the number of matches.
    Ambiguous(usize),
    /// Nobody in the room has the destination peer id.
    Missed,
    /// The signal was a join and was handled as one.
    Joined,
}

/// Decode one inbound text frame and handle it.
///
/// A frame that does not decode is dropped and answered with an `error`
/// notice; it never affects the connection or anybody else.
pub fn handle_text(state: &ServerState, conn: &ConnHandle, text: &str) {
    match ClientEvent::decode(text) {
        Ok(event) => dispatch(state, conn, event),
        Err(e) => {
            counters::protocol_errors_total();
            tracing::debug!(conn = %conn.id, error = %e, "dropping malformed envelope");
            fanout::send_to(conn.id, &conn.outbox, &ServerEvent::Error(Notice::protocol(&e)));
        }
    }
}

/// Hand a decoded envelope to the handler that owns its kind.
pub fn dispatch(state: &ServerState, conn: &ConnHandle, event: ClientEvent) {
    counters::envelopes_received_total(event.name());
    match event {
        ClientEvent::Join(join) => handle_join(state, conn, join),
        ClientEvent::WebrtcSignal(signal) => {
            let _ = handle_signal(state, conn, signal);
        }
        ClientEvent::SendChatMessage(message) => {
            let _ = chat::handle_chat(state, conn, message);
        }
        ClientEvent::Drawing(drawing) => {
            let _ = whiteboard::handle_drawing(state, conn, drawing);
        }
    }
}

/// Register the connection in a room, announce it to the room and
/// acknowledge the sender.
///
/// Joining again on the same connection replaces the session. When the room
/// or the peer id changes, the old room gets a departure notice for the old
/// peer.
pub fn handle_join(state: &ServerState, conn: &ConnHandle, join: Join) {
    let session = Session {
        conn_id: conn.id,
        peer_id: join.uuid.clone(),
        display_name: join.display_name.clone(),
        room_id: join.room.clone(),
        outbox: conn.outbox.clone(),
    };
    if let Some(previous) = state.registry.register(session) {
        if previous.room_id != join.room || previous.peer_id != join.uuid {
            let _ = disconnect::announce_departure(state, &previous);
        }
    }
    gauges::sessions_active(state.registry.len());

    tracing::info!(
        conn = %conn.id,
        room = %join.room,
        peer = %join.uuid,
        "{} joined", join.display_name
    );

    let ack = ServerEvent::JoinSuccess(JoinSuccess {
        room: join.room.clone(),
        uuid: join.uuid.clone(),
        display_name: join.display_name.clone(),
    });
    let others = state.registry.recipients(&join.room, Some(conn.id));
    let _ = fanout::fan_out(&others, &ServerEvent::WebrtcSignal(Signal::Join(join)));
    let _ = fanout::send_to(conn.id, &conn.outbox, &ack);
}

/// Relay an offer, answer or ICE candidate.
///
/// `"all"` goes to every other member of the room. A peer id goes to the
/// connection registered under it in that room; an absent peer is a silent
/// drop, and a peer id shared by several connections goes to the oldest
/// one with a warning.
pub fn handle_signal(state: &ServerState, conn: &ConnHandle, signal: Signal) -> RouteOutcome {
    let (room, dest) = match &signal {
        Signal::Join(join) => {
            handle_join(state, conn, join.clone());
            return RouteOutcome::Joined;
        }
        Signal::Offer(n) | Signal::Answer(n) | Signal::Ice(n) => (n.room.clone(), n.dest.clone()),
    };
    let kind = signal.kind();
    let event = ServerEvent::WebrtcSignal(signal);

    match dest {
        Destination::All => {
            let others = state.registry.recipients(&room, Some(conn.id));
            let reached = fanout::fan_out(&others, &event);
            tracing::trace!(conn = %conn.id, room = %room, kind, reached, "signal broadcast");
            RouteOutcome::Broadcast(reached)
        }
        Destination::Peer(peer) => {
            let targets = state.registry.peer_recipients(&room, &peer);
            match targets.as_slice() {
                [] => {
                    counters::routing_misses_total();
                    tracing::debug!(conn = %conn.id, room = %room, dest = %peer, kind, "destination not in room, dropping signal");
                    RouteOutcome::Missed
                }
                [target] => {
                    let _ = fanout::send_to(target.conn_id, &target.outbox, &event);
                    RouteOutcome::Delivered
                }
                [first, ..] => {
                    counters::duplicate_peer_total();
                    tracing::warn!(
                        room = %room,
                        dest = %peer,
                        matches = targets.len(),
                        chosen = %first.conn_id,
                        kind,
                        "peer id registered on several connections, delivering to the oldest"
                    );
                    let _ = fanout::send_to(first.conn_id, &first.outbox, &event);
                    RouteOutcome::Ambiguous(targets.len())
                }
            }
        }
    }
}
