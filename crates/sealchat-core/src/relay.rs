//! Relay service: the boundary between a transport and the directory.
//!
//! The transport feeds decoded client events in and receives two kinds of
//! outbound work through [`RelayTransport`]: point-to-point delivery and
//! roster broadcast. Direct replies (registration results, signature
//! lookups, frame errors) are returned to the caller instead.
//!
//! Roster broadcasts only ever follow a committed directory mutation, and
//! leave in the order their snapshots were taken.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::errors::ChatError;
use crate::protocol::{ClientEvent, RosterEntry, ServerEvent, WireMessage};
use crate::types::ConnectionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed: {0}")]
    ConnectionClosed(ConnectionId),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Outbound operations the relay needs from a transport.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Deliver one encrypted message to a live connection.
    async fn deliver(
        &self,
        to: ConnectionId,
        from: &str,
        message: WireMessage,
    ) -> Result<(), TransportError>;

    /// Send the public roster to every connected client.
    async fn broadcast_roster(&self, roster: Vec<RosterEntry>) -> Result<(), TransportError>;
}

/// What happened to one inbound event; used for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Registered,
    RegistrationRejected,
    Relayed,
    Undeliverable,
    LookedUp,
    LoggedOut,
    Rejected,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub outcome: Outcome,
    pub reply: Option<ServerEvent>,
}

impl Dispatch {
    fn new(outcome: Outcome, reply: Option<ServerEvent>) -> Self {
        Self { outcome, reply }
    }
}

pub struct RelayService<T: RelayTransport> {
    directory: Arc<Directory>,
    transport: Arc<T>,
    roster_lock: Arc<Mutex<()>>,
}

impl<T: RelayTransport> Clone for RelayService<T> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            transport: Arc::clone(&self.transport),
            roster_lock: Arc::clone(&self.roster_lock),
        }
    }
}

impl<T: RelayTransport> RelayService<T> {
    pub fn new(directory: Arc<Directory>, transport: Arc<T>) -> Self {
        Self {
            directory,
            transport,
            roster_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    async fn broadcast(&self) {
        // Snapshot and hand-off share one lock so rosters leave in commit order.
        let _guard = self.roster_lock.lock().await;
        let roster = self.directory.snapshot();
        if let Err(e) = self.transport.broadcast_roster(roster).await {
            // The directory is already consistent; the next mutation resends.
            warn!(error = %e, "roster broadcast failed");
        }
    }

    /// Register `username` for `connection`; broadcast on success.
    pub async fn on_register(
        &self,
        connection: ConnectionId,
        username: &str,
        exchange_public_key: Vec<u8>,
        binding_signature: Vec<u8>,
    ) -> Result<(), ChatError> {
        self.directory
            .register(username, exchange_public_key, binding_signature, connection)?;
        self.broadcast().await;
        Ok(())
    }

    /// Remove whatever `connection` registered. Broadcasts only if an entry
    /// was actually removed.
    pub async fn on_disconnect(&self, connection: ConnectionId) -> bool {
        let removed = self.directory.remove(connection).is_some();
        if removed {
            self.broadcast().await;
        }
        removed
    }

    /// Forward `message` from the connection's registered username to `to`.
    ///
    /// `UnknownRecipient` is reported to the caller only; nothing is sent
    /// back to the sender.
    pub async fn on_incoming_message(
        &self,
        connection: ConnectionId,
        to: &str,
        message: WireMessage,
    ) -> Result<(), ChatError> {
        let from = self
            .directory
            .username_for(connection)
            .ok_or(ChatError::NotRegistered)?;

        let Some(recipient) = self.directory.lookup(to) else {
            warn!(from = %from, to = %to, "recipient not found");
            return Err(ChatError::UnknownRecipient(to.to_string()));
        };

        debug!(from = %from, to = %to, bytes = message.ciphertext.len(), "relaying message");
        if let Err(e) = self.transport.deliver(recipient.connection, &from, message).await {
            warn!(from = %from, to = %to, error = %e, "delivery failed");
            return Err(ChatError::UnknownRecipient(to.to_string()));
        }
        Ok(())
    }

    /// Exchange key and binding signature currently registered for `username`.
    pub fn on_signature_request(&self, username: &str) -> ServerEvent {
        match self.directory.lookup(username) {
            Some(entry) => ServerEvent::RecipientSignature {
                username: entry.username,
                exchange_public_key: entry.exchange_public_key,
                binding_signature: entry.binding_signature,
            },
            None => ServerEvent::RecipientUnknown {
                username: username.to_string(),
            },
        }
    }

    pub async fn handle(&self, connection: ConnectionId, event: ClientEvent) -> Dispatch {
        match event {
            ClientEvent::Register {
                username,
                exchange_public_key,
                binding_signature,
            } => match self
                .on_register(connection, &username, exchange_public_key, binding_signature)
                .await
            {
                Ok(()) => Dispatch::new(Outcome::Registered, Some(ServerEvent::registered())),
                Err(e) => Dispatch::new(Outcome::RegistrationRejected, Some(ServerEvent::rejected(&e))),
            },
            ClientEvent::PrivateMessage { to, message } => {
                match self.on_incoming_message(connection, &to, message).await {
                    Ok(()) => Dispatch::new(Outcome::Relayed, None),
                    Err(ChatError::UnknownRecipient(_)) => Dispatch::new(Outcome::Undeliverable, None),
                    Err(e) => Dispatch::new(Outcome::Rejected, Some(ServerEvent::error(&e))),
                }
            }
            ClientEvent::GetRecipientSignature { username } => {
                Dispatch::new(Outcome::LookedUp, Some(self.on_signature_request(&username)))
            }
            ClientEvent::Logout => {
                self.on_disconnect(connection).await;
                Dispatch::new(Outcome::LoggedOut, None)
            }
        }
    }

    /// Decode and handle one text frame.
    pub async fn handle_frame(&self, connection: ConnectionId, frame: &str) -> Dispatch {
        match ClientEvent::from_json(frame) {
            Ok(event) => self.handle(connection, event).await,
            Err(e) => {
                debug!(connection = %connection, error = %e, "malformed frame");
                let err = ChatError::from(e);
                Dispatch::new(Outcome::Malformed, Some(ServerEvent::error(&err)))
            }
        }
    }
}
