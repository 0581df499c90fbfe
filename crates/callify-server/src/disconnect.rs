//! Disconnect handling: removal from the registry and the departure notice.

use crate::fanout;
use crate::metrics::gauges;
use crate::registry::{ConnectionId, Session};
use crate::server::ServerState;
use callify_common::envelope::UserLeft;
use callify_common::ServerEvent;

/// Forget the session of a closed connection and tell its room.
///
/// Safe to call more than once and for connections that never joined; only
/// the call that actually removes a session sends `user-left`. Returns
/// whether a session was removed.
pub fn handle_disconnect(state: &ServerState, conn_id: ConnectionId) -> bool {
    let Some(session) = state.registry.remove(conn_id) else {
        tracing::trace!(conn = %conn_id, "disconnect without session");
        return false;
    };
    gauges::sessions_active(state.registry.len());
    let notified = announce_departure(state, &session);
    tracing::info!(
        conn = %conn_id,
        room = %session.room_id,
        peer = %session.peer_id,
        notified,
        "{} left", session.display_name
    );
    true
}

/// Send `user-left` for `session` to the rest of its room.
pub(crate) fn announce_departure(state: &ServerState, session: &Session) -> usize {
    let recipients = state
        .registry
        .recipients(&session.room_id, Some(session.conn_id));
    fanout::fan_out(
        &recipients,
        &ServerEvent::UserLeft(UserLeft {
            uuid: session.peer_id.clone(),
            display_name: session.display_name.clone(),
        }),
    )
}
