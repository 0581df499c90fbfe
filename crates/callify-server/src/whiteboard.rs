//! Whiteboard relay.

use crate::fanout;
use crate::registry::ConnHandle;
use crate::server::ServerState;
use callify_common::envelope::Drawing;
use callify_common::ServerEvent;

/// Relay a stroke to every other member of the room.
///
/// Nothing is stored; a participant joining later only sees strokes drawn
/// after it joined.
pub fn handle_drawing(state: &ServerState, conn: &ConnHandle, drawing: Drawing) -> usize {
    let Drawing { room, data } = drawing;
    let recipients = state.registry.recipients(&room, Some(conn.id));
    let relayed = fanout::fan_out(&recipients, &ServerEvent::Drawing(data));
    tracing::trace!(room = %room, conn = %conn.id, relayed, "drawing relayed");
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{join_room, recv_event, state, test_conn};
    use serde_json::json;

    #[tokio::test]
    async fn drawing_reaches_others_unchanged() {
        let state = state();
        let (alice, mut alice_rx) = test_conn(&state);
        let (bob, mut bob_rx) = test_conn(&state);
        join_room(&state, &alice, "p1", "Alice", "r1", &mut alice_rx);
        join_room(&state, &bob, "p2", "Bob", "r1", &mut bob_rx);
        let _ = recv_event(&mut alice_rx);

        let stroke = json!({"points": [[0, 0], [4, 2]], "color": "#ff0000", "width": 3});
        let relayed = handle_drawing(
            &state,
            &alice,
            Drawing {
                room: "r1".into(),
                data: stroke.clone(),
            },
        );

        assert_eq!(relayed, 1);
        assert_eq!(recv_event(&mut bob_rx), ServerEvent::Drawing(stroke));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drawing_stays_in_its_room() {
        let state = state();
        let (alice, mut alice_rx) = test_conn(&state);
        let (bob, mut bob_rx) = test_conn(&state);
        join_room(&state, &alice, "p1", "Alice", "r1", &mut alice_rx);
        join_room(&state, &bob, "p2", "Bob", "r2", &mut bob_rx);

        let relayed = handle_drawing(
            &state,
            &alice,
            Drawing {
                room: "r1".into(),
                data: json!({"clear": true}),
            },
        );

        assert_eq!(relayed, 0);
        assert!(bob_rx.try_recv().is_err());
    }
}
