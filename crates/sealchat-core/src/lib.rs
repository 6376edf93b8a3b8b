//! sealchat-core: directory, wire protocol, relay service and client.

pub mod client;
pub mod directory;
pub mod errors;
pub mod harness;
pub mod protocol;
pub mod relay;
pub mod trust;
pub mod types;

pub use client::{ChatClient, ClientUpdate};
pub use directory::{Directory, DirectoryConfig, DirectoryEntry};
pub use errors::ChatError;
pub use protocol::{ClientEvent, RosterEntry, ServerEvent, WireMessage};
pub use relay::{Dispatch, Outcome, RelayService, RelayTransport, TransportError};
pub use types::ConnectionId;
