//! Cryptographic primitives adapter.
//!
//! Wraps key generation, signing, key agreement and authenticated encryption
//! behind one fixed suite so that independent implementations interoperate:
//!
//! * key agreement: ECDH on NIST P-256
//! * signing: RSA-PSS, SHA-256, 32-byte salt, 2048-bit modulus, e = 65537
//! * symmetric: AES-256-GCM, 96-bit nonce, no AAD
//! * key formats: SPKI (public), PKCS#8 (private), raw bytes (shared secret)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use p256::{
    ecdh,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    PublicKey as P256PublicKey, SecretKey as P256SecretKey,
};
use rand_core::OsRng;
use rsa::{
    pss,
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    traits::PublicKeyParts,
    BigUint, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::fingerprint::Fingerprint;

pub const RSA_MODULUS_BITS: usize = 2048;
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;
/// PSS salt length; equal to the SHA-256 output size.
pub const PSS_SALT_LEN: usize = 32;
pub const SHARED_SECRET_LEN: usize = 32;
pub const AES_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

const IDENTITY_ALGORITHM: &str = "RSA-PSS";
const EXCHANGE_ALGORITHM: &str = "ECDH P-256";

/// Error type for primitive operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(&'static str),
    #[error("algorithm mismatch: expected {expected}, got {got}")]
    AlgorithmMismatch {
        expected: &'static str,
        got: &'static str,
    },
    #[error("unsupported key parameters: {0}")]
    UnsupportedParameters(String),
    #[error("key generation failed")]
    KeyGeneration,
    #[error("signing failed")]
    Signing,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("RNG failed")]
    Rng,
}

impl CryptoError {
    /// True when the error comes from mismatched algorithm parameters rather
    /// than from a security check on attacker-controlled input.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CryptoError::AlgorithmMismatch { .. } | CryptoError::UnsupportedParameters(_)
        )
    }
}

fn check_rsa_parameters(key: &RsaPublicKey) -> Result<(), CryptoError> {
    let bits = key.n().bits();
    if bits != RSA_MODULUS_BITS {
        return Err(CryptoError::UnsupportedParameters(format!(
            "modulus is {bits} bits, expected {RSA_MODULUS_BITS}"
        )));
    }
    if key.e() != &BigUint::from(RSA_PUBLIC_EXPONENT) {
        return Err(CryptoError::UnsupportedParameters(format!(
            "public exponent is not {RSA_PUBLIC_EXPONENT}"
        )));
    }
    Ok(())
}

fn rsa_spki(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| CryptoError::InvalidEncoding("RSA public key cannot be encoded as SPKI"))
}

// ============================================================================
// Long-term signing identity
// ============================================================================

/// Long-term RSA-PSS signing identity. Never transmitted.
pub struct SigningIdentity {
    key: RsaPrivateKey,
    public: IdentityPublicKey,
}

impl SigningIdentity {
    /// Generate a fresh 2048-bit identity from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Self::from_private_key(key)
    }

    fn from_private_key(key: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_key = key.to_public_key();
        check_rsa_parameters(&public_key)?;
        let spki = rsa_spki(&public_key)?;
        Ok(Self {
            key,
            public: IdentityPublicKey {
                key: public_key,
                spki,
            },
        })
    }

    /// Restore an identity from its PKCS#8 DER export.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        match RsaPrivateKey::from_pkcs8_der(der) {
            Ok(key) => Self::from_private_key(key),
            Err(_) if P256SecretKey::from_pkcs8_der(der).is_ok() => {
                Err(CryptoError::AlgorithmMismatch {
                    expected: IDENTITY_ALGORITHM,
                    got: EXCHANGE_ALGORITHM,
                })
            }
            Err(_) => Err(CryptoError::InvalidEncoding("identity private key is not PKCS#8")),
        }
    }

    /// Export the private key as PKCS#8 DER for the local credential store.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.key
            .to_pkcs8_der()
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|_| CryptoError::InvalidEncoding("identity private key cannot be encoded"))
    }

    pub fn public_key(&self) -> &IdentityPublicKey {
        &self.public
    }

    /// RSA-PSS signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signing_key = pss::SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(|_| CryptoError::Signing)?;
        Ok(signature.to_vec())
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("fingerprint", &self.public.fingerprint().to_string())
            .finish_non_exhaustive()
    }
}

/// Public half of a [`SigningIdentity`], held in canonical SPKI form.
#[derive(Clone)]
pub struct IdentityPublicKey {
    key: RsaPublicKey,
    spki: Vec<u8>,
}

impl IdentityPublicKey {
    /// Import an identity key from SPKI DER.
    ///
    /// A well-formed key of the wrong algorithm or size is reported as a
    /// configuration error, distinct from [`CryptoError::InvalidEncoding`].
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        match RsaPublicKey::from_public_key_der(der) {
            Ok(key) => {
                check_rsa_parameters(&key)?;
                let spki = rsa_spki(&key)?;
                Ok(Self { key, spki })
            }
            Err(_) if P256PublicKey::from_public_key_der(der).is_ok() => {
                Err(CryptoError::AlgorithmMismatch {
                    expected: IDENTITY_ALGORITHM,
                    got: EXCHANGE_ALGORITHM,
                })
            }
            Err(_) => Err(CryptoError::InvalidEncoding("identity public key is not SPKI")),
        }
    }

    pub fn to_spki_der(&self) -> &[u8] {
        &self.spki
    }

    /// SHA-256 fingerprint of the SPKI bytes, for out-of-band comparison.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.spki)
    }

    /// Verify an RSA-PSS signature. Malformed signatures verify as false.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = pss::Signature::try_from(signature) else {
            return false;
        };
        pss::VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(message, &signature)
            .is_ok()
    }
}

impl PartialEq for IdentityPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.spki == other.spki
    }
}

impl Eq for IdentityPublicKey {}

impl std::fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IdentityPublicKey")
            .field(&self.fingerprint().to_string())
            .finish()
    }
}

// ============================================================================
// Ephemeral exchange keys
// ============================================================================

/// Ephemeral P-256 key-agreement pair, generated once per session.
///
/// The secret scalar zeroizes on drop and is never exported over the wire.
pub struct ExchangeKeyPair {
    secret: P256SecretKey,
    public: ExchangePublicKey,
}

impl ExchangeKeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = P256SecretKey::random(&mut OsRng);
        let public = ExchangePublicKey::from_key(secret.public_key())?;
        Ok(Self { secret, public })
    }

    /// Restore a pair from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let secret = match P256SecretKey::from_pkcs8_der(der) {
            Ok(secret) => secret,
            Err(_) if RsaPrivateKey::from_pkcs8_der(der).is_ok() => {
                return Err(CryptoError::AlgorithmMismatch {
                    expected: EXCHANGE_ALGORITHM,
                    got: IDENTITY_ALGORITHM,
                })
            }
            Err(_) => return Err(CryptoError::InvalidEncoding("exchange private key is not PKCS#8")),
        };
        let public = ExchangePublicKey::from_key(secret.public_key())?;
        Ok(Self { secret, public })
    }

    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.secret
            .to_pkcs8_der()
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|_| CryptoError::InvalidEncoding("exchange private key cannot be encoded"))
    }

    pub fn public_key(&self) -> &ExchangePublicKey {
        &self.public
    }

    /// ECDH with the peer's public key. Returns the raw 32-byte x-coordinate.
    pub fn agree(&self, peer: &ExchangePublicKey) -> SharedSecret {
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.key.as_affine());
        let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        SharedSecret(out)
    }
}

impl std::fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// P-256 public key in canonical SPKI form.
#[derive(Clone)]
pub struct ExchangePublicKey {
    key: P256PublicKey,
    spki: Vec<u8>,
}

impl ExchangePublicKey {
    fn from_key(key: P256PublicKey) -> Result<Self, CryptoError> {
        let spki = key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|_| CryptoError::InvalidEncoding("exchange public key cannot be encoded"))?;
        Ok(Self { key, spki })
    }

    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        match P256PublicKey::from_public_key_der(der) {
            Ok(key) => Self::from_key(key),
            Err(_) if RsaPublicKey::from_public_key_der(der).is_ok() => {
                Err(CryptoError::AlgorithmMismatch {
                    expected: EXCHANGE_ALGORITHM,
                    got: IDENTITY_ALGORITHM,
                })
            }
            Err(_) => Err(CryptoError::InvalidEncoding("exchange public key is not P-256 SPKI")),
        }
    }

    pub fn to_spki_der(&self) -> &[u8] {
        &self.spki
    }
}

impl PartialEq for ExchangePublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.spki == other.spki
    }
}

impl Eq for ExchangePublicKey {}

impl std::fmt::Debug for ExchangePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExchangePublicKey")
            .field(&Fingerprint::of(&self.spki).short())
            .finish()
    }
}

/// Raw ECDH output. Compared in constant time, zeroized on drop.
#[derive(Clone)]
pub struct SharedSecret(Zeroizing<[u8; SHARED_SECRET_LEN]>);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq::constant_time_eq(self.0.as_slice(), other.0.as_slice())
    }
}

impl Eq for SharedSecret {}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

// ============================================================================
// Operation-style API
// ============================================================================

pub fn generate_signing_identity() -> Result<SigningIdentity, CryptoError> {
    SigningIdentity::generate()
}

pub fn generate_exchange_key_pair() -> Result<ExchangeKeyPair, CryptoError> {
    ExchangeKeyPair::generate()
}

pub fn sign(identity: &SigningIdentity, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    identity.sign(message)
}

pub fn verify(public_key: &IdentityPublicKey, message: &[u8], signature: &[u8]) -> bool {
    public_key.verify(message, signature)
}

pub fn agree(local: &ExchangeKeyPair, peer: &ExchangePublicKey) -> SharedSecret {
    local.agree(peer)
}

/// Fill a fresh 96-bit nonce from the OS random source.
pub fn random_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::Rng)?;
    Ok(nonce)
}

/// AES-256-GCM encryption without AAD. Output is ciphertext || tag.
pub fn encrypt(
    key: &[u8; AES_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)
}

/// AES-256-GCM decryption. Fails closed: any tag mismatch or truncated input
/// yields [`CryptoError::AuthenticationFailure`] and no plaintext.
pub fn decrypt(
    key: &[u8; AES_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailure)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
