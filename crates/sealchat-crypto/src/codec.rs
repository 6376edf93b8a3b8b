//! Message codec.
//!
//! Every sealed message carries a fresh random 96-bit nonce drawn from the OS
//! RNG. The codec never accepts a caller-supplied nonce and keeps no counter,
//! so restarts sharing a key cannot replay a nonce sequence.

use crate::primitives::{self, CryptoError, NONCE_LEN};
use crate::session::Session;

/// Decryption or authentication failed. Deliberately carries no detail:
/// a wrong key and a corrupted ciphertext are indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message authentication failed")]
pub struct AuthenticationFailure;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    #[error("RNG failed")]
    Rng,
    #[error("encryption failed")]
    EncryptFailed,
}

impl From<CryptoError> for SealError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Rng => SealError::Rng,
            _ => SealError::EncryptFailed,
        }
    }
}

/// `{ciphertext, nonce}`, produced once by the sender and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

impl EncryptedMessage {
    /// Build from wire parts; a nonce of the wrong length is a format
    /// failure and is reported the same way as a bad tag.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> Result<Self, AuthenticationFailure> {
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| AuthenticationFailure)?;
        Ok(Self { ciphertext, nonce })
    }
}

/// Encrypt `plaintext` under the session key with a fresh random nonce.
pub fn seal(session: &Session, plaintext: &[u8]) -> Result<EncryptedMessage, SealError> {
    let nonce = primitives::random_nonce()?;
    let ciphertext = primitives::encrypt(session.symmetric_key(), &nonce, plaintext)?;
    Ok(EncryptedMessage { ciphertext, nonce })
}

/// Decrypt and authenticate. Never yields partial plaintext.
pub fn open(session: &Session, message: &EncryptedMessage) -> Result<Vec<u8>, AuthenticationFailure> {
    primitives::decrypt(session.symmetric_key(), &message.nonce, &message.ciphertext)
        .map_err(|_| AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ExchangeKeyPair;
    use crate::session::{establish, establish_with, KeyDerivation};
    use std::collections::HashSet;

    fn pair_of_sessions() -> (Session, Session) {
        let a = ExchangeKeyPair::generate().unwrap();
        let b = ExchangeKeyPair::generate().unwrap();
        (establish(&a, b.public_key()), establish(&b, a.public_key()))
    }

    #[test]
    fn test_seal_open_between_peers() {
        let (alice, bob) = pair_of_sessions();

        let message = seal(&alice, b"hello").unwrap();
        assert_eq!(open(&bob, &message).unwrap(), b"hello");
    }

    #[test]
    fn test_empty_plaintext() {
        let (alice, bob) = pair_of_sessions();

        let message = seal(&alice, b"").unwrap();
        assert_eq!(message.ciphertext.len(), 16);
        assert!(open(&bob, &message).unwrap().is_empty());
    }

    #[test]
    fn test_nonce_freshness() {
        let (alice, _) = pair_of_sessions();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let message = seal(&alice, b"x").unwrap();
            assert!(seen.insert(message.nonce), "nonce repeated");
        }
    }

    #[test]
    fn test_same_plaintext_differs_on_the_wire() {
        let (alice, _) = pair_of_sessions();

        let m1 = seal(&alice, b"same").unwrap();
        let m2 = seal(&alice, b"same").unwrap();
        assert_ne!(m1.ciphertext, m2.ciphertext);
    }

    #[test]
    fn test_flipped_ciphertext_bit_fails() {
        let (alice, bob) = pair_of_sessions();
        let mut message = seal(&alice, b"hello").unwrap();

        message.ciphertext[2] ^= 0x04;
        assert_eq!(open(&bob, &message), Err(AuthenticationFailure));
    }

    #[test]
    fn test_flipped_nonce_bit_fails() {
        let (alice, bob) = pair_of_sessions();
        let mut message = seal(&alice, b"hello").unwrap();

        message.nonce[11] ^= 0x80;
        assert_eq!(open(&bob, &message), Err(AuthenticationFailure));
    }

    #[test]
    fn test_third_party_cannot_open() {
        let a = ExchangeKeyPair::generate().unwrap();
        let b = ExchangeKeyPair::generate().unwrap();
        let c = ExchangeKeyPair::generate().unwrap();

        let alice = establish(&a, b.public_key());
        let message = seal(&alice, b"hello").unwrap();

        assert_eq!(open(&establish(&c, a.public_key()), &message), Err(AuthenticationFailure));
        assert_eq!(open(&establish(&c, b.public_key()), &message), Err(AuthenticationFailure));
    }

    #[test]
    fn test_mismatched_key_derivation_fails() {
        let a = ExchangeKeyPair::generate().unwrap();
        let b = ExchangeKeyPair::generate().unwrap();

        let raw = establish(&a, b.public_key());
        let hardened = establish_with(&b, a.public_key(), KeyDerivation::HkdfSha256V1).unwrap();

        let message = seal(&raw, b"hello").unwrap();
        assert_eq!(open(&hardened, &message), Err(AuthenticationFailure));
    }

    #[test]
    fn test_truncated_message_fails() {
        let (alice, bob) = pair_of_sessions();
        let message = seal(&alice, b"hello").unwrap();

        let truncated = EncryptedMessage {
            ciphertext: message.ciphertext[..8].to_vec(),
            nonce: message.nonce,
        };
        assert_eq!(open(&bob, &truncated), Err(AuthenticationFailure));
    }

    #[test]
    fn test_from_parts_rejects_bad_nonce_length() {
        assert_eq!(
            EncryptedMessage::from_parts(vec![0; 20], &[0; 11]),
            Err(AuthenticationFailure)
        );
        assert!(EncryptedMessage::from_parts(vec![0; 20], &[0; 12]).is_ok());
    }
}
