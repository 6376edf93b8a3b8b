//! Pinned identity keys.
//!
//! Trust in a peer's long-term identity comes from outside the relay: a
//! fingerprint read aloud, a QR code, or a key pinned in an earlier session.
//! Once pinned, a different key for the same username is refused unless the
//! user explicitly replaces it.

use std::collections::HashMap;

use sealchat_crypto::IdentityPublicKey;

use crate::errors::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Pinned,
    AlreadyPinned,
}

#[derive(Debug, Default, Clone)]
pub struct PinnedIdentities {
    pins: HashMap<String, IdentityPublicKey>,
}

impl PinnedIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust-on-first-use pin.
    pub fn pin(&mut self, username: &str, key: IdentityPublicKey) -> Result<PinOutcome, ChatError> {
        match self.pins.get(username) {
            Some(existing) if *existing == key => Ok(PinOutcome::AlreadyPinned),
            Some(_) => Err(ChatError::IdentityMismatch(username.to_string())),
            None => {
                self.pins.insert(username.to_string(), key);
                Ok(PinOutcome::Pinned)
            }
        }
    }

    /// Pin from SPKI DER received out of band.
    pub fn pin_der(&mut self, username: &str, spki: &[u8]) -> Result<PinOutcome, ChatError> {
        let key = IdentityPublicKey::from_spki_der(spki)?;
        self.pin(username, key)
    }

    /// Overwrite a pin after the user has re-verified the peer.
    pub fn replace(&mut self, username: &str, key: IdentityPublicKey) -> Option<IdentityPublicKey> {
        self.pins.insert(username.to_string(), key)
    }

    pub fn get(&self, username: &str) -> Option<&IdentityPublicKey> {
        self.pins.get(username)
    }

    pub fn remove(&mut self, username: &str) -> Option<IdentityPublicKey> {
        self.pins.remove(username)
    }
}
