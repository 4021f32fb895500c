//! Registry of live WebSocket connections and their owner subscriptions.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::messages::{LiveEvent, ServerMessage};

/// Fan-out of live events to an owner's subscribers
pub trait LivePublisher: Send + Sync {
    /// Deliver `event` to every connection subscribed to `owner_id`.
    /// Returns how many connections accepted it.
    fn publish(&self, owner_id: &str, event: LiveEvent) -> usize;
}

/// State for a single WebSocket connection
struct ConnectionState {
    tx: mpsc::UnboundedSender<ServerMessage>,
    owner_id: Option<String>,
}

/// Live connections keyed by session id.
///
/// Entries are added when a socket opens and removed when it closes; the
/// registry holds no other state.
pub struct LiveRegistry {
    connections: DashMap<String, ConnectionState>,
}

impl Default for LiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add_connection(&self, session_id: String, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.connections
            .insert(session_id, ConnectionState { tx, owner_id: None });
    }

    pub fn remove_connection(&self, session_id: &str) {
        self.connections.remove(session_id);
    }

    /// Point the session at `owner_id`, replacing any earlier subscription.
    pub fn subscribe(&self, session_id: &str, owner_id: &str) -> bool {
        match self.connections.get_mut(session_id) {
            Some(mut conn) => {
                conn.owner_id = Some(owner_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, session_id: &str) -> bool {
        match self.connections.get_mut(session_id) {
            Some(mut conn) => conn.owner_id.take().is_some(),
            None => false,
        }
    }

    /// Send a message to one session
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) -> bool {
        self.connections
            .get(session_id)
            .is_some_and(|conn| conn.tx.send(msg).is_ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().owner_id.as_deref() == Some(owner_id))
            .count()
    }
}

impl LivePublisher for LiveRegistry {
    fn publish(&self, owner_id: &str, event: LiveEvent) -> usize {
        let kind = event.kind();
        let doc_id = event.doc_id().to_string();
        let msg: ServerMessage = event.into();
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.owner_id.as_deref() == Some(owner_id) && conn.tx.send(msg.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if sent_count > 0 {
            metrics::counter!("folio_live_events_sent_total", "type" => kind)
                .increment(sent_count as u64);
            debug!(owner_id, doc_id = %doc_id, kind, sent_count, "Published live event");
        } else {
            metrics::counter!("folio_live_events_dropped_total", "type" => kind).increment(1);
        }
        sent_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(doc_id: &str) -> LiveEvent {
        LiveEvent::Completed {
            doc_id: doc_id.to_string(),
            pages: Some(1),
        }
    }

    #[test]
    fn test_add_remove_connection() {
        let registry = LiveRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.add_connection("session1".to_string(), tx);
        assert_eq!(registry.connection_count(), 1);

        registry.remove_connection("session1");
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.subscribe("session1", "alice"));
    }

    #[test]
    fn test_publish_reaches_only_owner_subscribers() {
        let registry = LiveRegistry::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();

        registry.add_connection("a".into(), alice_tx);
        registry.add_connection("b".into(), bob_tx);
        registry.add_connection("idle".into(), idle_tx);
        assert!(registry.subscribe("a", "alice"));
        assert!(registry.subscribe("b", "bob"));

        assert_eq!(registry.publish("alice", completed("d1")), 1);
        assert!(matches!(
            alice_rx.try_recv(),
            Ok(ServerMessage::Completed { doc_id, .. }) if doc_id == "d1"
        ));
        assert!(bob_rx.try_recv().is_err());
        assert!(idle_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let registry = LiveRegistry::new();
        assert_eq!(registry.publish("nobody", completed("d1")), 0);
    }

    #[test]
    fn test_unsubscribe_and_closed_receivers() {
        let registry = LiveRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.add_connection("s".into(), tx);
        registry.subscribe("s", "alice");
        assert_eq!(registry.subscriber_count("alice"), 1);

        drop(rx);
        assert_eq!(registry.publish("alice", completed("d1")), 0);

        assert!(registry.unsubscribe("s"));
        assert!(!registry.unsubscribe("s"));
        assert_eq!(registry.subscriber_count("alice"), 0);
    }
}
