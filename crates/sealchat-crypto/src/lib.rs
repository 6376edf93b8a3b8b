#![forbid(unsafe_code)]

pub mod fingerprint;
pub mod primitives;

pub mod binding;
pub mod session;
pub mod codec;

#[cfg(test)]
mod proptests;

pub use binding::{bind, verify_binding, BindingStatement};
pub use codec::{open, seal, AuthenticationFailure, EncryptedMessage};
pub use primitives::{
    CryptoError, ExchangeKeyPair, ExchangePublicKey, IdentityPublicKey, SigningIdentity,
};
pub use session::{establish, establish_with, KeyDerivation, Session};
