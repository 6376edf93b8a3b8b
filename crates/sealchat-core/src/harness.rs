//! In-memory relay transport for tests and local simulations.
//!
//! Records every delivery and broadcast per connection, in order, so a test
//! can replay them into [`crate::client::ChatClient`] instances.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sealchat_crypto::SigningIdentity;

use crate::client::{ChatClient, ClientUpdate};
use crate::directory::Directory;
use crate::errors::ChatError;
use crate::protocol::{RosterEntry, ServerEvent, WireMessage};
use crate::relay::{RelayService, RelayTransport, TransportError};
use crate::types::{ConnectionId, ConnectionIdAllocator};

#[derive(Debug, Default)]
struct Recorded {
    inboxes: BTreeMap<ConnectionId, Vec<ServerEvent>>,
    rosters: Vec<Vec<RosterEntry>>,
    deliveries: HashMap<ConnectionId, Vec<(String, WireMessage)>>,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    ids: ConnectionIdAllocator,
    recorded: Mutex<Recorded>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new simulated connection.
    pub fn connect(&self) -> ConnectionId {
        let id = self.ids.next();
        self.recorded().inboxes.insert(id, Vec::new());
        id
    }

    /// Close a simulated connection; later deliveries to it fail.
    pub fn close(&self, connection: ConnectionId) {
        self.recorded().inboxes.remove(&connection);
    }

    /// Every roster broadcast so far, oldest first.
    pub fn rosters(&self) -> Vec<Vec<RosterEntry>> {
        self.recorded().rosters.clone()
    }

    /// `(from, message)` pairs delivered to `connection`.
    pub fn deliveries(&self, connection: ConnectionId) -> Vec<(String, WireMessage)> {
        self.recorded()
            .deliveries
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Drain everything queued for `connection`, broadcasts included.
    pub fn take_events(&self, connection: ConnectionId) -> Vec<ServerEvent> {
        self.recorded()
            .inboxes
            .get_mut(&connection)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelayTransport for RecordingTransport {
    async fn deliver(
        &self,
        to: ConnectionId,
        from: &str,
        message: WireMessage,
    ) -> Result<(), TransportError> {
        let mut recorded = self.recorded();
        let inbox = recorded
            .inboxes
            .get_mut(&to)
            .ok_or(TransportError::ConnectionClosed(to))?;
        inbox.push(ServerEvent::PrivateMessage {
            from: from.to_string(),
            message: message.clone(),
        });
        recorded
            .deliveries
            .entry(to)
            .or_default()
            .push((from.to_string(), message));
        Ok(())
    }

    async fn broadcast_roster(&self, roster: Vec<RosterEntry>) -> Result<(), TransportError> {
        let mut recorded = self.recorded();
        for inbox in recorded.inboxes.values_mut() {
            inbox.push(ServerEvent::UserList {
                users: roster.clone(),
            });
        }
        recorded.rosters.push(roster);
        Ok(())
    }
}

/// Feed every queued event for `connection` into `client`.
pub fn pump(
    transport: &RecordingTransport,
    connection: ConnectionId,
    client: &mut ChatClient,
) -> Result<Vec<ClientUpdate>, ChatError> {
    transport
        .take_events(connection)
        .into_iter()
        .map(|event| client.handle_server_event(event))
        .collect()
}

/// Register `client` as `username` on a fresh connection.
pub async fn join(
    service: &RelayService<RecordingTransport>,
    transport: &RecordingTransport,
    client: &mut ChatClient,
    username: &str,
) -> Result<ConnectionId, ChatError> {
    let connection = transport.connect();
    let dispatch = service.handle(connection, client.register(username)).await;
    if let Some(reply) = dispatch.reply {
        match client.handle_server_event(reply)? {
            ClientUpdate::Registered => {}
            ClientUpdate::RegistrationRejected { reason } => {
                return Err(ChatError::Configuration(format!("registration rejected: {reason}")))
            }
            other => {
                return Err(ChatError::Configuration(format!("unexpected reply: {other:?}")))
            }
        }
    }
    Ok(connection)
}

/// Ask the relay for `peer`'s binding and verify it.
pub async fn verify_peer(
    service: &RelayService<RecordingTransport>,
    connection: ConnectionId,
    client: &mut ChatClient,
    peer: &str,
) -> Result<(), ChatError> {
    let dispatch = service.handle(connection, client.request_binding(peer)).await;
    match dispatch.reply {
        Some(reply) => match client.handle_server_event(reply)? {
            ClientUpdate::PeerVerified { .. } => Ok(()),
            _ => Err(ChatError::UnknownRecipient(peer.to_string())),
        },
        None => Err(ChatError::UnknownRecipient(peer.to_string())),
    }
}

/// Two clients, one relay: register both, verify bindings, send `plaintext`
/// from alice to bob and return what bob decrypted.
pub async fn run_message_flow(
    alice_identity: Arc<SigningIdentity>,
    bob_identity: Arc<SigningIdentity>,
    plaintext: &[u8],
) -> Result<Vec<u8>, ChatError> {
    let transport = Arc::new(RecordingTransport::new());
    let service = RelayService::new(Arc::new(Directory::default()), Arc::clone(&transport));

    let mut alice = ChatClient::new(alice_identity)?;
    let mut bob = ChatClient::new(bob_identity)?;
    alice.pins_mut().pin("bob", bob.identity_public_key().clone())?;
    bob.pins_mut().pin("alice", alice.identity_public_key().clone())?;

    let ca = join(&service, &transport, &mut alice, "alice").await?;
    let cb = join(&service, &transport, &mut bob, "bob").await?;
    pump(&transport, ca, &mut alice)?;
    pump(&transport, cb, &mut bob)?;

    verify_peer(&service, ca, &mut alice, "bob").await?;
    verify_peer(&service, cb, &mut bob, "alice").await?;

    let dispatch = service.handle(ca, alice.compose("bob", plaintext)?).await;
    if let Some(ServerEvent::Error { reason }) = dispatch.reply {
        return Err(ChatError::Configuration(format!("relay refused message: {reason}")));
    }

    pump(&transport, cb, &mut bob)?
        .into_iter()
        .find_map(|update| match update {
            ClientUpdate::Message { from, plaintext } if from == "alice" => Some(plaintext),
            _ => None,
        })
        .ok_or_else(|| ChatError::UnknownRecipient("bob".to_string()))
}
