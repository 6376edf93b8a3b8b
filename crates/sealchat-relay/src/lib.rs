pub mod api;
pub mod config;
pub mod hub;
pub mod metrics;
pub mod server;

pub use hub::Hub;
pub use server::RelayServer;
