//! Live socket registry.
//!
//! Every attached socket owns a bounded outbound queue; a writer task drains
//! it into the WebSocket. The hub never blocks on a slow socket: a full queue
//! drops the event for that socket only.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use sealchat_core::protocol::{RosterEntry, ServerEvent, WireMessage};
use sealchat_core::types::ConnectionIdAllocator;
use sealchat_core::{ConnectionId, RelayTransport, TransportError};

use crate::metrics::RelayMetrics;

pub struct Hub {
    ids: ConnectionIdAllocator,
    connections: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    queue_len: usize,
    metrics: Arc<RelayMetrics>,
}

impl Hub {
    pub fn new(queue_len: usize, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            ids: ConnectionIdAllocator::new(),
            connections: DashMap::new(),
            queue_len,
            metrics,
        }
    }

    /// Register a new socket and return its id and outbound queue.
    pub fn attach(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_len);
        let id = self.ids.next();
        self.connections.insert(id, tx);
        self.metrics.connected_sockets.set(self.connections.len() as f64);
        debug!(connection = %id, "socket attached");
        (id, rx)
    }

    pub fn detach(&self, connection: ConnectionId) {
        if self.connections.remove(&connection).is_some() {
            self.metrics.connected_sockets.set(self.connections.len() as f64);
            debug!(connection = %connection, "socket detached");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue `event` for one socket.
    pub fn send(&self, connection: ConnectionId, event: ServerEvent) -> Result<(), TransportError> {
        // Clone the sender so no map shard lock is held while sending.
        let tx = self
            .connections
            .get(&connection)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::ConnectionClosed(connection))?;

        tx.try_send(event).map_err(|e| {
            self.metrics.outbound_dropped.inc();
            match e {
                TrySendError::Full(_) => {
                    TransportError::SendFailed(format!("outbound queue full for {connection}"))
                }
                TrySendError::Closed(_) => TransportError::ConnectionClosed(connection),
            }
        })
    }
}

#[async_trait]
impl RelayTransport for Hub {
    async fn deliver(
        &self,
        to: ConnectionId,
        from: &str,
        message: WireMessage,
    ) -> Result<(), TransportError> {
        self.send(
            to,
            ServerEvent::PrivateMessage {
                from: from.to_string(),
                message,
            },
        )
    }

    async fn broadcast_roster(&self, roster: Vec<RosterEntry>) -> Result<(), TransportError> {
        self.metrics.registered_users.set(roster.len() as f64);

        let targets: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        for connection in targets {
            let event = ServerEvent::UserList {
                users: roster.clone(),
            };
            if let Err(e) = self.send(connection, event) {
                warn!(connection = %connection, error = %e, "roster not delivered");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hub(queue_len: usize) -> Hub {
        Hub::new(queue_len, Arc::new(RelayMetrics::new().unwrap()))
    }

    fn wire() -> WireMessage {
        WireMessage {
            ciphertext: vec![9; 17],
            nonce: vec![0; 12],
        }
    }

    #[tokio::test]
    async fn test_deliver_reaches_only_target() {
        let hub = hub(8);
        let (a, mut rx_a) = hub.attach();
        let (_b, mut rx_b) = hub.attach();

        hub.deliver(a, "bob", wire()).await.unwrap();

        assert_eq!(
            rx_a.recv().await,
            Some(ServerEvent::PrivateMessage {
                from: "bob".into(),
                message: wire()
            })
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_socket() {
        let hub = hub(8);
        let (_a, mut rx_a) = hub.attach();
        let (_b, mut rx_b) = hub.attach();
        let roster = vec![RosterEntry {
            username: "alice".into(),
            exchange_public_key: vec![1, 2, 3],
        }];

        hub.broadcast_roster(roster.clone()).await.unwrap();

        let expected = ServerEvent::UserList { users: roster };
        assert_eq!(rx_a.recv().await, Some(expected.clone()));
        assert_eq!(rx_b.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn test_detached_socket_is_closed() {
        let hub = hub(8);
        let (a, _rx) = hub.attach();
        hub.detach(a);

        assert_eq!(
            hub.deliver(a, "bob", wire()).await,
            Err(TransportError::ConnectionClosed(a))
        );
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let hub = hub(1);
        let (a, mut rx) = hub.attach();

        hub.deliver(a, "bob", wire()).await.unwrap();
        let err = hub.deliver(a, "bob", wire()).await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
        assert_eq!(hub.metrics.outbound_dropped.get(), 1.0);

        // The queued event survives.
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let hub = hub(4);
        let (a, rx) = hub.attach();
        drop(rx);

        assert_eq!(
            hub.deliver(a, "bob", wire()).await,
            Err(TransportError::ConnectionClosed(a))
        );
    }

    proptest! {
        #[test]
        fn prop_queue_accepts_up_to_capacity(capacity in 1usize..16, attempts in 0usize..48) {
            let hub = hub(capacity);
            let (a, _rx) = hub.attach();

            let accepted = (0..attempts)
                .filter(|_| hub.send(a, ServerEvent::Error { reason: "x".into() }).is_ok())
                .count();

            prop_assert_eq!(accepted, attempts.min(capacity));
            prop_assert_eq!(hub.metrics.outbound_dropped.get() as usize, attempts - accepted);
        }
    }
}
