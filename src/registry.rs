use std::{collections::HashMap, fmt::Display, net::SocketAddr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::{debug, info};
use uuid::Uuid;

/// A serialized message, shared by every client it is delivered to.
pub type Message = Arc<str>;

/// Identifies one accepted connection.
/// Unique per connection, also if the same peer reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// A new, unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The first group is plenty to tell clients apart in logs.
        let id = self.0.to_string();
        write!(f, "{}", &id[..8])
    }
}

/// Delivering to a client failed for good.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Client {id}@{addr} is gone")]
pub struct ClientSendFailure {
    /// The failed client.
    pub id: ClientId,

    /// Where it was connected from.
    pub addr: SocketAddr,
}

/// What happened when handing a message to a client.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Delivery {
    /// The message is queued for the client.
    Queued,

    /// The client is behind, so this message was dropped for it.
    Lagged,
}

/// One connected peer, as seen by the registry.
///
/// Holds the sending half of the peer's outbox. The connection's own
/// writer task owns the receiving half and the socket.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ClientId,
    addr: SocketAddr,
    outbox: mpsc::Sender<Message>,
}

impl ClientConnection {
    /// A new connection with an outbox holding up to `capacity` messages.
    /// The returned receiver must be drained by whoever writes to the peer.
    pub fn new(addr: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbox, receiver) = mpsc::channel(capacity.max(1));

        (
            Self {
                id: ClientId::new(),
                addr,
                outbox,
            },
            receiver,
        )
    }

    /// The connection's id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The peer's address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Hand a message to the connection without waiting.
    pub fn try_send(&self, message: &Message) -> Result<Delivery, ClientSendFailure> {
        match self.outbox.try_send(Arc::clone(message)) {
            Ok(()) => Ok(Delivery::Queued),
            Err(TrySendError::Full(_)) => Ok(Delivery::Lagged),
            Err(TrySendError::Closed(_)) => Err(ClientSendFailure {
                id: self.id,
                addr: self.addr,
            }),
        }
    }
}

impl Display for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// The set of connected clients.
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, ClientConnection>>>,
}

impl ClientRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connection.
    /// Returns false if it was already tracked.
    pub async fn add(&self, connection: ClientConnection) -> bool {
        let mut clients = self.clients.lock().await;

        let id = connection.id;
        let is_new = clients.insert(id, connection).is_none();

        info!(%id, total = clients.len(), "Client registered");

        is_new
    }

    /// Stop tracking a connection.
    /// Does nothing if it is not tracked.
    pub async fn remove(&self, id: ClientId) -> Option<ClientConnection> {
        let mut clients = self.clients.lock().await;

        let removed = clients.remove(&id);

        if removed.is_some() {
            info!(%id, remaining = clients.len(), "Client removed");
        } else {
            debug!(%id, "Client already removed");
        }

        removed
    }

    /// A point in time copy of the members.
    pub async fn snapshot(&self) -> Vec<ClientConnection> {
        self.clients.lock().await.values().cloned().collect()
    }

    /// True if the connection is tracked.
    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }

    /// How many connections are tracked.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// True if nobody is connected.
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn add_remove_snapshot() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty().await);

        let (a, _rx_a) = ClientConnection::new(addr(1), 4);
        let (b, _rx_b) = ClientConnection::new(addr(2), 4);

        assert!(registry.add(a.clone()).await);
        assert!(!registry.add(a.clone()).await);
        assert!(registry.add(b.clone()).await);
        assert_eq!(registry.len().await, 2);

        let snapshot = registry.snapshot().await;

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());

        // Snapshots are copies.
        assert_eq!(snapshot.len(), 2);

        assert!(!registry.contains(a.id()).await);
        assert!(registry.contains(b.id()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn clones_share_members() {
        let registry = ClientRegistry::new();
        let other = registry.clone();

        let (a, _rx) = ClientConnection::new(addr(1), 4);
        registry.add(a.clone()).await;

        assert!(other.contains(a.id()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_exact_membership() {
        let registry = ClientRegistry::new();

        let mut tasks = vec![];
        for i in 0..64u16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (connection, rx) = ClientConnection::new(addr(i), 1);
                let id = connection.id();
                registry.add(connection).await;
                tokio::task::yield_now().await;

                // Every third client stays.
                if i % 3 == 0 {
                    Some((id, rx))
                } else {
                    registry.remove(id).await;
                    None
                }
            }));
        }

        let mut expected = HashSet::new();
        let mut receivers = vec![];
        for task in tasks {
            if let Some((id, rx)) = task.await.unwrap() {
                expected.insert(id);
                receivers.push(rx);
            }
        }

        let members = registry
            .snapshot()
            .await
            .iter()
            .map(ClientConnection::id)
            .collect::<HashSet<_>>();

        assert_eq!(members, expected);
        assert_eq!(members.len(), 22);
    }

    #[tokio::test]
    async fn try_send_reports_lag_and_closure() {
        let (connection, mut rx) = ClientConnection::new(addr(1), 1);
        let message: Message = Arc::from("{}");

        assert_eq!(connection.try_send(&message), Ok(Delivery::Queued));
        assert_eq!(connection.try_send(&message), Ok(Delivery::Lagged));

        assert_eq!(rx.recv().await.as_deref(), Some("{}"));

        drop(rx);
        let failure = connection.try_send(&message).unwrap_err();
        assert_eq!(failure.id, connection.id());
    }
}
