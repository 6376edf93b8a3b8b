//! Key-binding protocol.
//!
//! A binding statement is an RSA-PSS signature by a long-term identity over
//! the canonical encoding of an ephemeral exchange public key. A recipient
//! who already trusts the identity key (pinned, or compared out of band) can
//! then reject any substituted exchange key, whatever the directory says.
//!
//! Canonical encoding: standard base64 of the SPKI DER bytes, signed as
//! ASCII with no further framing.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::primitives::{
    CryptoError, ExchangePublicKey, IdentityPublicKey, SigningIdentity,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// The verifier's own key material has the wrong algorithm or size.
    #[error("binding configuration error: {0}")]
    Configuration(CryptoError),
    #[error("invalid identity key encoding")]
    InvalidIdentityKey,
    #[error("signing failed")]
    Signing,
}

impl From<CryptoError> for BindingError {
    fn from(err: CryptoError) -> Self {
        if err.is_configuration() {
            BindingError::Configuration(err)
        } else if matches!(err, CryptoError::Signing) {
            BindingError::Signing
        } else {
            BindingError::InvalidIdentityKey
        }
    }
}

/// Canonical bytes signed for an exchange public key.
pub fn canonical_encoding(exchange_public_spki: &[u8]) -> Vec<u8> {
    STANDARD.encode(exchange_public_spki).into_bytes()
}

/// `(exchange_public_key, signature)`; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingStatement {
    exchange_public_key: Vec<u8>,
    signature: Vec<u8>,
}

impl BindingStatement {
    /// Reassemble a statement received from the wire.
    pub fn from_parts(exchange_public_key: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            exchange_public_key,
            signature,
        }
    }

    /// SPKI DER bytes of the bound exchange key.
    pub fn exchange_public_key(&self) -> &[u8] {
        &self.exchange_public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Verify against a trusted identity key and, on success, return the
    /// parsed exchange key. `None` covers every mismatch.
    pub fn verified_key(&self, identity: &IdentityPublicKey) -> Option<ExchangePublicKey> {
        if !verify_binding(identity, &self.exchange_public_key, &self.signature) {
            return None;
        }
        ExchangePublicKey::from_spki_der(&self.exchange_public_key).ok()
    }
}

/// Sign the canonical encoding of `exchange_public` with the identity key.
pub fn bind(
    identity: &SigningIdentity,
    exchange_public: &ExchangePublicKey,
) -> Result<BindingStatement, BindingError> {
    let spki = exchange_public.to_spki_der();
    let signature = identity.sign(&canonical_encoding(spki))?;
    Ok(BindingStatement {
        exchange_public_key: spki.to_vec(),
        signature,
    })
}

/// Check a binding signature.
///
/// Returns false for any altered exchange key, identity or signature, and
/// for exchange keys that are not P-256 SPKI. No reason is surfaced.
pub fn verify_binding(
    identity: &IdentityPublicKey,
    exchange_public_spki: &[u8],
    signature: &[u8],
) -> bool {
    if ExchangePublicKey::from_spki_der(exchange_public_spki).is_err() {
        return false;
    }
    identity.verify(&canonical_encoding(exchange_public_spki), signature)
}

/// [`verify_binding`] taking the identity key as SPKI DER.
///
/// An identity key of the wrong algorithm or size is a configuration error
/// and is returned as `Err`, never folded into `Ok(false)`.
pub fn verify_binding_der(
    identity_spki: &[u8],
    exchange_public_spki: &[u8],
    signature: &[u8],
) -> Result<bool, BindingError> {
    let identity = IdentityPublicKey::from_spki_der(identity_spki)?;
    Ok(verify_binding(&identity, exchange_public_spki, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::tests::{alice_identity, bob_identity};
    use crate::primitives::ExchangeKeyPair;

    #[test]
    fn test_bind_verify() {
        let identity = alice_identity();
        let exchange = ExchangeKeyPair::generate().unwrap();

        let statement = bind(identity, exchange.public_key()).unwrap();
        assert_eq!(statement.exchange_public_key(), exchange.public_key().to_spki_der());
        assert!(verify_binding(
            identity.public_key(),
            statement.exchange_public_key(),
            statement.signature()
        ));
        assert_eq!(
            statement.verified_key(identity.public_key()).as_ref(),
            Some(exchange.public_key())
        );
    }

    #[test]
    fn test_substituted_exchange_key_rejected() {
        let identity = alice_identity();
        let genuine = ExchangeKeyPair::generate().unwrap();
        let attacker = ExchangeKeyPair::generate().unwrap();

        let statement = bind(identity, genuine.public_key()).unwrap();
        assert!(!verify_binding(
            identity.public_key(),
            attacker.public_key().to_spki_der(),
            statement.signature()
        ));
    }

    #[test]
    fn test_wrong_identity_rejected() {
        let exchange = ExchangeKeyPair::generate().unwrap();
        let statement = bind(alice_identity(), exchange.public_key()).unwrap();

        assert!(statement.verified_key(bob_identity().public_key()).is_none());
    }

    #[test]
    fn test_truncated_exchange_key_rejected() {
        let identity = alice_identity();
        let exchange = ExchangeKeyPair::generate().unwrap();
        let statement = bind(identity, exchange.public_key()).unwrap();

        let spki = statement.exchange_public_key();
        assert!(!verify_binding(
            identity.public_key(),
            &spki[..spki.len() - 1],
            statement.signature()
        ));
        assert!(!verify_binding(identity.public_key(), &[], statement.signature()));
    }

    #[test]
    fn test_canonical_encoding_is_base64_of_spki() {
        let encoded = canonical_encoding(&[0x30, 0x59, 0x30, 0x13]);
        assert_eq!(encoded, b"MFkwEw==");
    }

    #[test]
    fn test_verify_der_distinguishes_configuration_errors() {
        let exchange = ExchangeKeyPair::generate().unwrap();
        let statement = bind(alice_identity(), exchange.public_key()).unwrap();

        // Exchange key passed where an identity key belongs
        let err = verify_binding_der(
            exchange.public_key().to_spki_der(),
            statement.exchange_public_key(),
            statement.signature(),
        )
        .unwrap_err();
        assert!(matches!(err, BindingError::Configuration(_)));

        assert_eq!(
            verify_binding_der(b"junk", statement.exchange_public_key(), statement.signature()),
            Err(BindingError::InvalidIdentityKey)
        );

        assert_eq!(
            verify_binding_der(
                alice_identity().public_key().to_spki_der(),
                statement.exchange_public_key(),
                statement.signature(),
            ),
            Ok(true)
        );
    }
}
