//! Wire protocol between clients and the relay.
//!
//! Events are a closed set of JSON variants tagged by `"type"`. Binary
//! fields (keys, signatures, ciphertexts, nonces) travel as standard base64.
//! A frame that does not decode into one of these variants is rejected
//! before it reaches the directory.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sealchat_crypto::codec::{AuthenticationFailure, EncryptedMessage};

use crate::errors::ChatError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<ProtocolError> for ChatError {
    fn from(err: ProtocolError) -> Self {
        ChatError::InvalidEncoding(err.to_string())
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

/// `{ciphertext, nonce}` as carried over the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

impl From<EncryptedMessage> for WireMessage {
    fn from(message: EncryptedMessage) -> Self {
        Self {
            ciphertext: message.ciphertext,
            nonce: message.nonce.to_vec(),
        }
    }
}

impl TryFrom<&WireMessage> for EncryptedMessage {
    type Error = AuthenticationFailure;

    fn try_from(wire: &WireMessage) -> Result<Self, Self::Error> {
        EncryptedMessage::from_parts(wire.ciphertext.clone(), &wire.nonce)
    }
}

/// Public roster line: never carries signatures or connection handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub username: String,
    #[serde(with = "base64_bytes")]
    pub exchange_public_key: Vec<u8>,
}

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Register {
        username: String,
        #[serde(with = "base64_bytes")]
        exchange_public_key: Vec<u8>,
        #[serde(with = "base64_bytes")]
        binding_signature: Vec<u8>,
    },
    PrivateMessage {
        to: String,
        message: WireMessage,
    },
    GetRecipientSignature {
        username: String,
    },
    Logout,
}

impl ClientEvent {
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    RegisterResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    UserList {
        users: Vec<RosterEntry>,
    },
    PrivateMessage {
        from: String,
        message: WireMessage,
    },
    #[serde(rename_all = "camelCase")]
    RecipientSignature {
        username: String,
        #[serde(with = "base64_bytes")]
        exchange_public_key: Vec<u8>,
        #[serde(with = "base64_bytes")]
        binding_signature: Vec<u8>,
    },
    RecipientUnknown {
        username: String,
    },
    Error {
        reason: String,
    },
}

impl ServerEvent {
    pub fn registered() -> Self {
        ServerEvent::RegisterResult {
            success: true,
            reason: None,
        }
    }

    pub fn rejected(err: &ChatError) -> Self {
        ServerEvent::RegisterResult {
            success: false,
            reason: Some(err.reason().to_string()),
        }
    }

    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error {
            reason: err.reason().to_string(),
        }
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
