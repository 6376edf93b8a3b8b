//! Identity directory.
//!
//! Maps each active username to its exchange-key material and the live
//! connection that registered it. All mutations go through one write lock,
//! so `register` and `remove` are linearizable: two live entries for one
//! username can never coexist, and a concurrent disconnect cannot lose an
//! entry that a later registration created.
//!
//! Usernames are not reserved across reconnects. A departed name is free
//! again the moment its entry is removed.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info};

use sealchat_crypto::ExchangePublicKey;

use crate::protocol::RosterEntry;
use crate::types::ConnectionId;

pub const DEFAULT_MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("invalid username: {0}")]
    InvalidUsername(&'static str),
    #[error("exchange public key is not P-256 SPKI")]
    InvalidExchangeKey,
    #[error("binding signature is empty")]
    EmptySignature,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub max_username_len: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }
}

/// One active registration. Created by `register`, destroyed once by
/// `remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub username: String,
    pub exchange_public_key: Vec<u8>,
    pub binding_signature: Vec<u8>,
    pub connection: ConnectionId,
}

impl DirectoryEntry {
    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            username: self.username.clone(),
            exchange_public_key: self.exchange_public_key.clone(),
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Name previously held by the same connection, released atomically.
    pub replaced: Option<String>,
}

#[derive(Debug)]
struct Slot {
    entry: DirectoryEntry,
    seq: u64,
}

#[derive(Debug, Default)]
struct DirectoryState {
    by_username: HashMap<String, Slot>,
    by_connection: HashMap<ConnectionId, String>,
    next_seq: u64,
}

impl DirectoryState {
    fn remove_connection(&mut self, connection: ConnectionId) -> Option<DirectoryEntry> {
        let username = self.by_connection.remove(&connection)?;
        self.by_username.remove(&username).map(|slot| slot.entry)
    }
}

/// Server-side registry of active usernames.
#[derive(Debug, Default)]
pub struct Directory {
    config: DirectoryConfig,
    state: RwLock<DirectoryState>,
}

impl Directory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    // A panic while holding the lock cannot leave the maps half-updated:
    // every mutation below validates first and then commits in one step.
    fn read(&self) -> RwLockReadGuard<'_, DirectoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_username(&self, username: &str) -> Result<(), DirectoryError> {
        if username.is_empty() {
            return Err(DirectoryError::InvalidUsername("empty"));
        }
        if username.len() > self.config.max_username_len {
            return Err(DirectoryError::InvalidUsername("too long"));
        }
        if username.chars().any(char::is_control) {
            return Err(DirectoryError::InvalidUsername("control characters"));
        }
        Ok(())
    }

    /// Atomic check-then-insert.
    ///
    /// Fails with `UsernameTaken` if any live entry holds `username`, without
    /// mutating anything. Broadcasting the roster is the caller's job, after
    /// this returns.
    pub fn register(
        &self,
        username: &str,
        exchange_public_key: Vec<u8>,
        binding_signature: Vec<u8>,
        connection: ConnectionId,
    ) -> Result<Registration, DirectoryError> {
        self.validate_username(username)?;
        if ExchangePublicKey::from_spki_der(&exchange_public_key).is_err() {
            return Err(DirectoryError::InvalidExchangeKey);
        }
        if binding_signature.is_empty() {
            return Err(DirectoryError::EmptySignature);
        }

        let mut state = self.write();
        if state.by_username.contains_key(username) {
            debug!(username = %username, connection = %connection, "registration rejected: name taken");
            return Err(DirectoryError::UsernameTaken);
        }

        // A connection owns at most one name
        let replaced = state.remove_connection(connection).map(|old| old.username);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.by_connection.insert(connection, username.to_string());
        state.by_username.insert(
            username.to_string(),
            Slot {
                entry: DirectoryEntry {
                    username: username.to_string(),
                    exchange_public_key,
                    binding_signature,
                    connection,
                },
                seq,
            },
        );
        drop(state);

        info!(username = %username, connection = %connection, "registered");
        Ok(Registration { replaced })
    }

    pub fn lookup(&self, username: &str) -> Option<DirectoryEntry> {
        self.read().by_username.get(username).map(|slot| slot.entry.clone())
    }

    pub fn username_for(&self, connection: ConnectionId) -> Option<String> {
        self.read().by_connection.get(&connection).cloned()
    }

    /// Remove the entry registered by `connection`, if any. Idempotent.
    pub fn remove(&self, connection: ConnectionId) -> Option<DirectoryEntry> {
        let removed = self.write().remove_connection(connection);
        if let Some(entry) = &removed {
            info!(username = %entry.username, connection = %connection, "removed");
        }
        removed
    }

    /// Public roster in registration order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        let state = self.read();
        let mut slots: Vec<&Slot> = state.by_username.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.iter().map(|slot| slot.entry.roster_entry()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
