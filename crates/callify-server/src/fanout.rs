use crate::metrics::counters;
use crate::registry::{ConnectionId, Outbox, Recipient};
use callify_common::ServerEvent;
use tokio::sync::mpsc::error::TrySendError;

/// Queue an already encoded envelope on one connection.
///
/// Never waits: a full or closed outbox drops this one message for this one
/// recipient. Returns `true` if the message was queued.
pub fn deliver(conn_id: ConnectionId, outbox: &Outbox, text: String) -> bool {
    match outbox.try_send(text) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counters::messages_dropped_total("outbox_full");
            tracing::debug!(conn = %conn_id, "outbox full, dropping envelope");
            false
        }
        Err(TrySendError::Closed(_)) => {
            counters::messages_dropped_total("closed");
            tracing::debug!(conn = %conn_id, "outbox closed, dropping envelope");
            false
        }
    }
}

/// Encode `event` and queue it on one connection.
pub fn send_to(conn_id: ConnectionId, outbox: &Outbox, event: &ServerEvent) -> bool {
    match encode(event) {
        Some(text) => {
            let sent = deliver(conn_id, outbox, text);
            if sent {
                counters::envelopes_sent_total(event.name());
            }
            sent
        }
        None => false,
    }
}

/// Encode `event` once and queue it on every recipient.
///
/// Recipients are independent: a failed delivery is counted and skipped.
/// Returns how many recipients the envelope was queued for.
pub fn fan_out(recipients: &[Recipient], event: &ServerEvent) -> usize {
    let Some(text) = encode(event) else {
        return 0;
    };
    let delivered = recipients
        .iter()
        .filter(|r| deliver(r.conn_id, &r.outbox, text.clone()))
        .count();
    if delivered > 0 {
        counters::envelopes_sent_total_by(event.name(), delivered as u64);
    }
    delivered
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            counters::messages_dropped_total("encode");
            tracing::error!(event = event.name(), error = %e, "failed to encode envelope");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callify_common::envelope::UserLeft;
    use tokio::sync::mpsc;

    fn left() -> ServerEvent {
        ServerEvent::UserLeft(UserLeft {
            uuid: "p1".into(),
            display_name: "Alice".into(),
        })
    }

    fn recipient(id: u64, capacity: usize) -> (Recipient, mpsc::Receiver<String>) {
        let (outbox, rx) = mpsc::channel(capacity);
        (
            Recipient {
                conn_id: ConnectionId::new(id),
                outbox,
            },
            rx,
        )
    }

    #[test]
    fn fan_out_reaches_every_recipient() {
        let (a, mut rx_a) = recipient(1, 4);
        let (b, mut rx_b) = recipient(2, 4);

        assert_eq!(fan_out(&[a, b], &left()), 2);
        assert!(rx_a.try_recv().unwrap().contains("user-left"));
        assert!(rx_b.try_recv().unwrap().contains("user-left"));
    }

    #[test]
    fn closed_recipient_does_not_stop_the_rest() {
        let (a, rx_a) = recipient(1, 4);
        let (b, mut rx_b) = recipient(2, 4);
        drop(rx_a);

        assert_eq!(fan_out(&[a, b], &left()), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn full_outbox_drops_without_blocking() {
        let (a, mut rx_a) = recipient(1, 1);

        assert!(send_to(a.conn_id, &a.outbox, &left()));
        assert!(!send_to(a.conn_id, &a.outbox, &left()));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn empty_recipient_list() {
        assert_eq!(fan_out(&[], &left()), 0);
    }
}
