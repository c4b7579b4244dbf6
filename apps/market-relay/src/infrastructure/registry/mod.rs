//! Connection Registry
//!
//! Live connections keyed by id. Publishing pushes a copy of an event onto
//! every connection's delivery queue; a connection leaves the registry
//! through its own close callback.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::application::ports::Transport;
use crate::application::services::ConnectionClient;
use crate::domain::market::MarketEvent;
use crate::infrastructure::metrics;

/// Connection identifier.
pub type ConnectionId = Uuid;

type SharedClient<T> = Arc<ConnectionClient<MarketEvent, T>>;

/// Registry of connected clients.
pub struct ConnectionRegistry<T> {
    clients: RwLock<HashMap<ConnectionId, SharedClient<T>>>,
    emptied: Notify,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            emptied: Notify::new(),
        }
    }
}

impl<T> ConnectionRegistry<T>
where
    T: Transport + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client`; it is removed again when its loop stops.
    pub fn register(self: &Arc<Self>, client: &SharedClient<T>) {
        let id = client.id();
        let count = {
            let mut clients = self.clients.write();
            clients.insert(id, Arc::clone(client));
            clients.len()
        };
        metrics::set_connections(count);
        tracing::info!(connection_id = %id, connections = count, "Client connected");

        let registry: Weak<Self> = Arc::downgrade(self);
        client.register_on_close(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });
    }

    /// Remove a connection. Returns whether it was registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut clients = self.clients.write();
            let removed = clients.remove(&id).is_some();
            (removed, clients.len())
        };
        if removed {
            metrics::set_connections(count);
            tracing::info!(connection_id = %id, connections = count, "Client disconnected");
            if count == 0 {
                self.emptied.notify_waiters();
            }
        }
        removed
    }

    /// Queue `event` on every connection. Returns how many received it.
    pub fn publish(&self, event: &MarketEvent) -> usize {
        let clients: Vec<SharedClient<T>> = self.clients.read().values().cloned().collect();
        let mut discarded = 0;
        for client in &clients {
            discarded += client.push(event.clone());
        }
        tracing::debug!(
            event = event.name(),
            key = %event.key(),
            recipients = clients.len(),
            discarded,
            "Published event"
        );
        clients.len()
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<SharedClient<T>> {
        self.clients.read().get(&id).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Resolve once no connection is live.
    pub async fn drained(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            // Register before checking so a removal in between is not missed.
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::application::ports::TransportError;
    use crate::application::services::DeliveryConfig;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&mut self, _frame: &[u8], _is_final: bool) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self, _reason: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn event() -> MarketEvent {
        MarketEvent::SalesAdd {
            item: 1,
            world: 2,
            sales: vec![],
        }
    }

    fn new_client() -> SharedClient<NullTransport> {
        Arc::new(ConnectionClient::new(NullTransport, DeliveryConfig::default()))
    }

    #[test]
    fn publish_reaches_every_client() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = new_client();
        let b = new_client();
        registry.register(&a);
        registry.register(&b);

        assert_eq!(registry.publish(&event()), 2);
        assert_eq!(a.pending(), 1);
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn publish_to_empty_registry() {
        let registry: Arc<ConnectionRegistry<NullTransport>> = Arc::new(ConnectionRegistry::new());
        assert!(registry.is_empty());
        assert_eq!(registry.publish(&event()), 0);
    }

    #[tokio::test]
    async fn stopped_client_is_removed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let client = new_client();
        registry.register(&client);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(client.id()).is_some());

        let cancel = CancellationToken::new();
        cancel.cancel();
        client.run(cancel).await.unwrap();

        assert!(registry.is_empty());
        assert!(!registry.remove(client.id()));
    }

    #[tokio::test]
    async fn drained_resolves_when_last_client_stops() {
        let registry = Arc::new(ConnectionRegistry::new());
        let clients = [new_client(), new_client()];
        for client in &clients {
            registry.register(client);
        }

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.drained().await })
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        clients[0].run(cancel.clone()).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        clients[1].run(cancel).await.unwrap();
        timeout(Duration::from_secs(2), waiter)
            .await
            .expect("drained did not resolve")
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn drained_returns_immediately_when_empty() {
        let registry: ConnectionRegistry<NullTransport> = ConnectionRegistry::new();
        timeout(Duration::from_millis(100), registry.drained())
            .await
            .expect("empty registry should already be drained");
    }
}
