use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Fan-out hub: one completed turn goes to every live connection
/// subscribed to that conversation. Keyed by conversation id so
/// subscribers of different conversations never contend.
///
/// Senders are the per-connection outbound channels; a full or closed
/// channel just drops that delivery (the connection loop is responsible
/// for its own lifecycle).
pub struct ConversationHub {
    subs: DashMap<String, Vec<(String, mpsc::Sender<String>)>>,
}

impl ConversationHub {
    pub fn new() -> Self {
        Self {
            subs: DashMap::new(),
        }
    }

    /// Subscribe a connection to a conversation. Idempotent per conn id.
    pub fn subscribe(&self, conversation_id: &str, conn_id: &str, tx: mpsc::Sender<String>) {
        let mut entry = self.subs.entry(conversation_id.to_string()).or_default();
        if !entry.iter().any(|(id, _)| id == conn_id) {
            entry.push((conn_id.to_string(), tx));
            debug!(conversation_id, conn_id, "subscribed");
        }
    }

    /// Drop every subscription held by a closing connection.
    pub fn unsubscribe_all(&self, conn_id: &str) {
        for mut entry in self.subs.iter_mut() {
            entry.value_mut().retain(|(id, _)| id != conn_id);
        }
    }

    /// Drop a conversation entirely (after `end_conversation`).
    pub fn remove_conversation(&self, conversation_id: &str) {
        self.subs.remove(conversation_id);
    }

    /// Deliver a payload to every subscriber except the originator (the
    /// originator gets the ack instead).
    pub fn broadcast_except(&self, conversation_id: &str, origin_conn_id: &str, payload: &str) {
        let Some(entry) = self.subs.get(conversation_id) else {
            return;
        };
        for (conn_id, tx) in entry.iter() {
            if conn_id == origin_conn_id {
                continue;
            }
            let _ = tx.try_send(payload.to_string());
        }
    }
}

impl Default for ConversationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_skips_the_originator() {
        let hub = ConversationHub::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        hub.subscribe("c-1", "conn-a", tx_a);
        hub.subscribe("c-1", "conn-b", tx_b);

        hub.broadcast_except("c-1", "conn-a", "payload");

        assert_eq!(rx_b.recv().await.unwrap(), "payload");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_the_conversation() {
        let hub = ConversationHub::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        hub.subscribe("c-2", "conn-a", tx_a);

        hub.broadcast_except("c-1", "conn-z", "payload");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_per_connection() {
        let hub = ConversationHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.subscribe("c-1", "conn-a", tx.clone());
        hub.subscribe("c-1", "conn-a", tx);

        hub.broadcast_except("c-1", "other", "payload");
        assert_eq!(rx.recv().await.unwrap(), "payload");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_removes_connection_everywhere() {
        let hub = ConversationHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.subscribe("c-1", "conn-a", tx.clone());
        hub.subscribe("c-2", "conn-a", tx);

        hub.unsubscribe_all("conn-a");
        hub.broadcast_except("c-1", "other", "one");
        hub.broadcast_except("c-2", "other", "two");
        assert!(rx.try_recv().is_err());
    }
}
