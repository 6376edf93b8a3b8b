//! Chat client: owns the local keys and the per-peer sessions.
//!
//! The client never trusts the relay. A peer's exchange key is used only
//! after its binding signature verifies against an identity key pinned
//! out of band, and every message is sealed independently.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sealchat_crypto::{
    bind, establish_with, open, seal, BindingStatement, EncryptedMessage, ExchangeKeyPair,
    ExchangePublicKey, IdentityPublicKey, KeyDerivation, Session, SigningIdentity,
};

use crate::errors::ChatError;
use crate::protocol::{ClientEvent, RosterEntry, ServerEvent, WireMessage};
use crate::trust::PinnedIdentities;

/// What a server event meant to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    Registered,
    RegistrationRejected { reason: String },
    Roster { users: Vec<String>, invalidated: Vec<String> },
    Message { from: String, plaintext: Vec<u8> },
    PeerVerified { username: String },
    PeerUnknown { username: String },
    ServerError { reason: String },
}

pub struct ChatClient {
    identity: Arc<SigningIdentity>,
    exchange: ExchangeKeyPair,
    binding: BindingStatement,
    key_derivation: KeyDerivation,
    username: Option<String>,
    pending_username: Option<String>,
    pins: PinnedIdentities,
    roster: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, Session>,
}

impl ChatClient {
    /// Start a client session: generate a fresh exchange key and bind it to
    /// the long-term identity.
    pub fn new(identity: Arc<SigningIdentity>) -> Result<Self, ChatError> {
        let exchange = ExchangeKeyPair::generate()?;
        let binding = bind(&identity, exchange.public_key())?;
        Ok(Self {
            identity,
            exchange,
            binding,
            key_derivation: KeyDerivation::default(),
            username: None,
            pending_username: None,
            pins: PinnedIdentities::new(),
            roster: HashMap::new(),
            sessions: HashMap::new(),
        })
    }

    /// Opt into a non-default key derivation. Both peers must agree.
    pub fn with_key_derivation(mut self, key_derivation: KeyDerivation) -> Self {
        self.key_derivation = key_derivation;
        self
    }

    pub fn identity_public_key(&self) -> &IdentityPublicKey {
        self.identity.public_key()
    }

    pub fn exchange_public_key(&self) -> &ExchangePublicKey {
        self.exchange.public_key()
    }

    pub fn binding(&self) -> &BindingStatement {
        &self.binding
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn pins(&self) -> &PinnedIdentities {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut PinnedIdentities {
        &mut self.pins
    }

    /// Build the `register` event for `username`.
    pub fn register(&mut self, username: &str) -> ClientEvent {
        self.pending_username = Some(username.to_string());
        ClientEvent::Register {
            username: username.to_string(),
            exchange_public_key: self.binding.exchange_public_key().to_vec(),
            binding_signature: self.binding.signature().to_vec(),
        }
    }

    /// Build the `logout` event. Peers drop their sessions with us when the
    /// roster no longer lists our key.
    pub fn logout(&mut self) -> ClientEvent {
        self.username = None;
        self.pending_username = None;
        ClientEvent::Logout
    }

    /// Discard the current exchange key and every session derived from it.
    /// The caller must register again with the returned event.
    pub fn rotate_exchange_key(&mut self) -> Result<(), ChatError> {
        let exchange = ExchangeKeyPair::generate()?;
        self.binding = bind(&self.identity, exchange.public_key())?;
        self.exchange = exchange;
        self.sessions.clear();
        self.username = None;
        Ok(())
    }

    pub fn request_binding(&self, username: &str) -> ClientEvent {
        ClientEvent::GetRecipientSignature {
            username: username.to_string(),
        }
    }

    /// Verify a peer's binding against its pinned identity and establish a
    /// session. On failure no session is created and any old one is dropped.
    pub fn accept_binding(
        &mut self,
        username: &str,
        exchange_public_key: &[u8],
        binding_signature: &[u8],
    ) -> Result<(), ChatError> {
        let identity = self
            .pins
            .get(username)
            .ok_or_else(|| ChatError::UntrustedIdentity(username.to_string()))?;

        let statement =
            BindingStatement::from_parts(exchange_public_key.to_vec(), binding_signature.to_vec());
        let Some(remote) = statement.verified_key(identity) else {
            self.sessions.remove(username);
            warn!(peer = %username, "binding signature rejected");
            return Err(ChatError::BindingVerificationFailed(username.to_string()));
        };

        let session = match establish_with(&self.exchange, &remote, self.key_derivation) {
            Ok(session) => session,
            Err(e) => {
                self.sessions.remove(username);
                return Err(e.into());
            }
        };
        self.sessions.insert(username.to_string(), session);
        info!(peer = %username, "session established");
        Ok(())
    }

    pub fn has_session(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    pub fn session(&self, username: &str) -> Option<&Session> {
        self.sessions.get(username)
    }

    /// Record a roster broadcast. Sessions whose peer left or changed its
    /// exchange key are dropped; the returned names need re-verification.
    pub fn apply_roster(&mut self, users: &[RosterEntry]) -> Vec<String> {
        self.roster = users
            .iter()
            .map(|entry| (entry.username.clone(), entry.exchange_public_key.clone()))
            .collect();

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(name, session)| {
                self.roster
                    .get(name.as_str())
                    .map_or(true, |key| key.as_slice() != session.remote_public().to_spki_der())
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            self.sessions.remove(name);
            debug!(peer = %name, "session invalidated by roster change");
        }
        stale
    }

    /// Online peers other than ourselves, as last broadcast.
    pub fn online_peers(&self) -> Vec<&str> {
        let me = self.username.as_deref();
        let mut peers: Vec<&str> = self
            .roster
            .keys()
            .map(String::as_str)
            .filter(|name| Some(*name) != me)
            .collect();
        peers.sort_unstable();
        peers
    }

    /// Seal `plaintext` for `to`.
    pub fn compose(&self, to: &str, plaintext: &[u8]) -> Result<ClientEvent, ChatError> {
        let session = self
            .sessions
            .get(to)
            .ok_or_else(|| ChatError::NoSession(to.to_string()))?;
        let message = seal(session, plaintext)?;
        Ok(ClientEvent::PrivateMessage {
            to: to.to_string(),
            message: WireMessage::from(message),
        })
    }

    /// Open a message relayed from `from`.
    pub fn receive(&self, from: &str, message: &WireMessage) -> Result<Vec<u8>, ChatError> {
        let session = self
            .sessions
            .get(from)
            .ok_or_else(|| ChatError::NoSession(from.to_string()))?;
        let message = EncryptedMessage::try_from(message)?;
        Ok(open(session, &message)?)
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) -> Result<ClientUpdate, ChatError> {
        match event {
            ServerEvent::RegisterResult { success: true, .. } => {
                self.username = self.pending_username.take();
                Ok(ClientUpdate::Registered)
            }
            ServerEvent::RegisterResult { success: false, reason } => {
                self.pending_username = None;
                Ok(ClientUpdate::RegistrationRejected {
                    reason: reason.unwrap_or_default(),
                })
            }
            ServerEvent::UserList { users } => {
                let invalidated = self.apply_roster(&users);
                Ok(ClientUpdate::Roster {
                    users: users.into_iter().map(|entry| entry.username).collect(),
                    invalidated,
                })
            }
            ServerEvent::PrivateMessage { from, message } => {
                let plaintext = self.receive(&from, &message)?;
                Ok(ClientUpdate::Message { from, plaintext })
            }
            ServerEvent::RecipientSignature {
                username,
                exchange_public_key,
                binding_signature,
            } => {
                self.accept_binding(&username, &exchange_public_key, &binding_signature)?;
                Ok(ClientUpdate::PeerVerified { username })
            }
            ServerEvent::RecipientUnknown { username } => {
                self.sessions.remove(&username);
                Ok(ClientUpdate::PeerUnknown { username })
            }
            ServerEvent::Error { reason } => Ok(ClientUpdate::ServerError { reason }),
        }
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("username", &self.username)
            .field("identity", &self.identity)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    pub(crate) fn alice_identity() -> Arc<SigningIdentity> {
        static ALICE: OnceLock<Arc<SigningIdentity>> = OnceLock::new();
        Arc::clone(ALICE.get_or_init(|| Arc::new(SigningIdentity::generate().unwrap())))
    }

    pub(crate) fn bob_identity() -> Arc<SigningIdentity> {
        static BOB: OnceLock<Arc<SigningIdentity>> = OnceLock::new();
        Arc::clone(BOB.get_or_init(|| Arc::new(SigningIdentity::generate().unwrap())))
    }

    fn eve_identity() -> Arc<SigningIdentity> {
        static EVE: OnceLock<Arc<SigningIdentity>> = OnceLock::new();
        Arc::clone(EVE.get_or_init(|| Arc::new(SigningIdentity::generate().unwrap())))
    }

    /// Alice and Bob with each other's identities pinned.
    fn acquainted() -> (ChatClient, ChatClient) {
        let mut alice = ChatClient::new(alice_identity()).unwrap();
        let mut bob = ChatClient::new(bob_identity()).unwrap();
        alice.pins_mut().pin("bob", bob.identity_public_key().clone()).unwrap();
        bob.pins_mut().pin("alice", alice.identity_public_key().clone()).unwrap();
        (alice, bob)
    }

    fn introduce(to: &mut ChatClient, name: &str, peer: &ChatClient) -> Result<(), ChatError> {
        to.accept_binding(name, peer.binding().exchange_public_key(), peer.binding().signature())
    }

    fn private_message(event: ClientEvent) -> WireMessage {
        match event {
            ClientEvent::PrivateMessage { message, .. } => message,
            other => panic!("expected privateMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_hello_round_trip() {
        let (mut alice, mut bob) = acquainted();
        introduce(&mut alice, "bob", &bob).unwrap();
        introduce(&mut bob, "alice", &alice).unwrap();

        let wire = private_message(alice.compose("bob", b"hello").unwrap());
        assert_eq!(bob.receive("alice", &wire).unwrap(), b"hello");
    }

    #[test]
    fn test_unpinned_peer_refused() {
        let mut alice = ChatClient::new(alice_identity()).unwrap();
        let bob = ChatClient::new(bob_identity()).unwrap();

        assert_eq!(
            introduce(&mut alice, "bob", &bob),
            Err(ChatError::UntrustedIdentity("bob".into()))
        );
        assert!(!alice.has_session("bob"));
    }

    #[test]
    fn test_substituted_exchange_key_refused() {
        let (mut alice, bob) = acquainted();
        // Eve answers the lookup for "bob" with her own bound key
        let eve = ChatClient::new(eve_identity()).unwrap();

        assert_eq!(
            introduce(&mut alice, "bob", &eve),
            Err(ChatError::BindingVerificationFailed("bob".into()))
        );
        // Eve's key with Bob's signature does not pass either
        assert!(alice
            .accept_binding(
                "bob",
                eve.binding().exchange_public_key(),
                bob.binding().signature()
            )
            .is_err());
        assert!(!alice.has_session("bob"));
        assert!(matches!(alice.compose("bob", b"hi"), Err(ChatError::NoSession(_))));
    }

    #[test]
    fn test_tampered_message_dropped() {
        let (mut alice, mut bob) = acquainted();
        introduce(&mut alice, "bob", &bob).unwrap();
        introduce(&mut bob, "alice", &alice).unwrap();

        let mut wire = private_message(alice.compose("bob", b"hello").unwrap());
        wire.ciphertext[0] ^= 1;
        assert_eq!(bob.receive("alice", &wire), Err(ChatError::AuthenticationFailure));

        let mut wire = private_message(alice.compose("bob", b"hello").unwrap());
        wire.nonce.pop();
        assert_eq!(bob.receive("alice", &wire), Err(ChatError::AuthenticationFailure));
    }

    #[test]
    fn test_roster_change_invalidates_session() {
        let (mut alice, bob) = acquainted();
        introduce(&mut alice, "bob", &bob).unwrap();

        let current = vec![RosterEntry {
            username: "bob".into(),
            exchange_public_key: bob.binding().exchange_public_key().to_vec(),
        }];
        assert!(alice.apply_roster(&current).is_empty());
        assert!(alice.has_session("bob"));

        let rotated = vec![RosterEntry {
            username: "bob".into(),
            exchange_public_key: ExchangeKeyPair::generate()
                .unwrap()
                .public_key()
                .to_spki_der()
                .to_vec(),
        }];
        assert_eq!(alice.apply_roster(&rotated), vec!["bob".to_string()]);
        assert!(!alice.has_session("bob"));
    }

    #[test]
    fn test_peer_leaving_invalidates_session() {
        let (mut alice, bob) = acquainted();
        introduce(&mut alice, "bob", &bob).unwrap();

        assert_eq!(alice.apply_roster(&[]), vec!["bob".to_string()]);
        assert!(alice.online_peers().is_empty());
    }

    #[test]
    fn test_registration_events() {
        let mut alice = ChatClient::new(alice_identity()).unwrap();
        let event = alice.register("alice");
        match event {
            ClientEvent::Register { username, exchange_public_key, binding_signature } => {
                assert_eq!(username, "alice");
                assert_eq!(exchange_public_key, alice.exchange_public_key().to_spki_der());
                assert!(sealchat_crypto::verify_binding(
                    alice.identity_public_key(),
                    &exchange_public_key,
                    &binding_signature
                ));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(alice.username(), None);

        let update = alice.handle_server_event(ServerEvent::registered()).unwrap();
        assert_eq!(update, ClientUpdate::Registered);
        assert_eq!(alice.username(), Some("alice"));
    }

    #[test]
    fn test_rotation_drops_sessions_and_rebinds() {
        let (mut alice, bob) = acquainted();
        introduce(&mut alice, "bob", &bob).unwrap();
        let old_key = alice.exchange_public_key().clone();

        alice.rotate_exchange_key().unwrap();
        assert_ne!(alice.exchange_public_key(), &old_key);
        assert!(!alice.has_session("bob"));
        assert!(sealchat_crypto::verify_binding(
            alice.identity_public_key(),
            alice.binding().exchange_public_key(),
            alice.binding().signature()
        ));
    }

    #[test]
    fn test_hardened_derivation_between_matching_peers() {
        let (alice, bob) = acquainted();
        let mut alice = alice.with_key_derivation(KeyDerivation::HkdfSha256V1);
        let mut bob = bob.with_key_derivation(KeyDerivation::HkdfSha256V1);
        introduce(&mut alice, "bob", &bob).unwrap();
        introduce(&mut bob, "alice", &alice).unwrap();

        let wire = private_message(alice.compose("bob", b"hardened").unwrap());
        assert_eq!(bob.receive("alice", &wire).unwrap(), b"hardened");
    }
}
