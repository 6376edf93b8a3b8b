//! Session establishment.
//!
//! A session is derived data: the local and remote exchange public keys and
//! the symmetric key computed from them. It is cheap to recompute, so callers
//! invalidate a cached session by simply establishing a new one.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::primitives::{
    CryptoError, ExchangeKeyPair, ExchangePublicKey, SharedSecret, AES_KEY_LEN,
};

const HKDF_INFO_V1: &[u8] = b"sealchat-session-key-v1";

/// How the AES key is derived from the ECDH output.
///
/// `Raw` is the interoperable default: the 32 raw ECDH bytes are the AES-256
/// key. `HkdfSha256V1` is an opt-in hardening that only interoperates with
/// peers using the same option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyDerivation {
    #[default]
    Raw,
    HkdfSha256V1,
}

/// Per-peer session state, held in memory for one conversation.
pub struct Session {
    local_public: ExchangePublicKey,
    remote_public: ExchangePublicKey,
    shared_secret: SharedSecret,
    key_derivation: KeyDerivation,
    key: Zeroizing<[u8; AES_KEY_LEN]>,
}

impl Session {
    pub fn local_public(&self) -> &ExchangePublicKey {
        &self.local_public
    }

    pub fn remote_public(&self) -> &ExchangePublicKey {
        &self.remote_public
    }

    pub fn shared_secret(&self) -> &SharedSecret {
        &self.shared_secret
    }

    pub fn key_derivation(&self) -> KeyDerivation {
        self.key_derivation
    }

    pub(crate) fn symmetric_key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_public", &self.local_public)
            .field("remote_public", &self.remote_public)
            .field("key_derivation", &self.key_derivation)
            .finish_non_exhaustive()
    }
}

/// Establish a session using the default (raw) key derivation.
pub fn establish(local: &ExchangeKeyPair, remote: &ExchangePublicKey) -> Session {
    let shared_secret = local.agree(remote);
    let key = Zeroizing::new(*shared_secret.as_bytes());
    assemble(local, remote, shared_secret, KeyDerivation::Raw, key)
}

pub fn establish_with(
    local: &ExchangeKeyPair,
    remote: &ExchangePublicKey,
    key_derivation: KeyDerivation,
) -> Result<Session, CryptoError> {
    match key_derivation {
        KeyDerivation::Raw => Ok(establish(local, remote)),
        KeyDerivation::HkdfSha256V1 => {
            let shared_secret = local.agree(remote);
            let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
            Hkdf::<Sha256>::new(None, shared_secret.as_bytes())
                .expand(HKDF_INFO_V1, key.as_mut_slice())
                .map_err(|_| CryptoError::KeyDerivation)?;
            Ok(assemble(local, remote, shared_secret, key_derivation, key))
        }
    }
}

fn assemble(
    local: &ExchangeKeyPair,
    remote: &ExchangePublicKey,
    shared_secret: SharedSecret,
    key_derivation: KeyDerivation,
    key: Zeroizing<[u8; AES_KEY_LEN]>,
) -> Session {
    Session {
        local_public: local.public_key().clone(),
        remote_public: remote.clone(),
        shared_secret,
        key_derivation,
        key,
    }
}
