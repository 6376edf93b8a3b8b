//! Error taxonomy for sealchat.
//!
//! Every failure surfaced by the directory, the relay service or the client
//! maps onto one of these variants, and each variant has a stable wire reason
//! string used in `registerResult` and `error` events.
//!
//! Cryptographic failures are terminal for the operation that raised them.
//! Nothing here is retried automatically.

use thiserror::Error;

use sealchat_crypto::binding::BindingError;
use sealchat_crypto::codec::{AuthenticationFailure, SealError};
use sealchat_crypto::CryptoError;

use crate::directory::DirectoryError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Registration conflict. Recoverable: retry with another name.
    #[error("username is already taken")]
    UsernameTaken,

    /// Malformed key, signature, username or frame. No state was changed.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Binding signature did not verify. Treat as a potential attack and do
    /// not proceed with the session.
    #[error("binding verification failed for {0}")]
    BindingVerificationFailed(String),

    /// Decryption or tag check failed. The message is dropped.
    #[error("message authentication failed")]
    AuthenticationFailure,

    /// Target username is absent from the directory.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    /// No identity key has been pinned for this peer.
    #[error("no trusted identity key for {0}")]
    UntrustedIdentity(String),

    /// A different identity key is already pinned for this peer.
    #[error("identity key for {0} does not match the pinned key")]
    IdentityMismatch(String),

    /// No verified session exists with this peer.
    #[error("no session with {0}")]
    NoSession(String),

    /// The connection tried to act before registering.
    #[error("connection is not registered")]
    NotRegistered,

    /// Wrong algorithm or key parameters on the local side.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Local signing or RNG failure.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl ChatError {
    /// Stable reason string carried on the wire.
    pub fn reason(&self) -> &'static str {
        match self {
            ChatError::UsernameTaken => "UsernameTaken",
            ChatError::InvalidEncoding(_) => "InvalidEncoding",
            ChatError::BindingVerificationFailed(_) => "BindingVerificationFailed",
            ChatError::AuthenticationFailure => "AuthenticationFailure",
            ChatError::UnknownRecipient(_) => "UnknownRecipient",
            ChatError::UntrustedIdentity(_) => "UntrustedIdentity",
            ChatError::IdentityMismatch(_) => "IdentityMismatch",
            ChatError::NoSession(_) => "NoSession",
            ChatError::NotRegistered => "NotRegistered",
            ChatError::Configuration(_) => "Configuration",
            ChatError::Crypto(_) => "Crypto",
        }
    }

    /// Whether the caller can reasonably try again with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::UsernameTaken
                | ChatError::InvalidEncoding(_)
                | ChatError::UnknownRecipient(_)
                | ChatError::NoSession(_)
                | ChatError::NotRegistered
        )
    }
}

impl From<DirectoryError> for ChatError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UsernameTaken => ChatError::UsernameTaken,
            other => ChatError::InvalidEncoding(other.to_string()),
        }
    }
}

impl From<CryptoError> for ChatError {
    fn from(err: CryptoError) -> Self {
        match err {
            e if e.is_configuration() => ChatError::Configuration(e.to_string()),
            CryptoError::InvalidEncoding(what) => ChatError::InvalidEncoding(what.to_string()),
            CryptoError::AuthenticationFailure => ChatError::AuthenticationFailure,
            other => ChatError::Crypto(other.to_string()),
        }
    }
}

impl From<BindingError> for ChatError {
    fn from(err: BindingError) -> Self {
        match err {
            BindingError::Configuration(e) => ChatError::Configuration(e.to_string()),
            BindingError::InvalidIdentityKey => {
                ChatError::InvalidEncoding("identity key".to_string())
            }
            BindingError::Signing => ChatError::Crypto("signing failed".to_string()),
        }
    }
}

impl From<AuthenticationFailure> for ChatError {
    fn from(_: AuthenticationFailure) -> Self {
        ChatError::AuthenticationFailure
    }
}

impl From<SealError> for ChatError {
    fn from(err: SealError) -> Self {
        ChatError::Crypto(err.to_string())
    }
}
