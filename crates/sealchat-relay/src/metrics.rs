use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, Counter, Encoder, Gauge,
    Registry, TextEncoder,
};
use std::sync::Arc;

use sealchat_core::Outcome;

pub struct RelayMetrics {
    pub connected_sockets: Gauge,
    pub registered_users: Gauge,
    pub registrations_accepted: Counter,
    pub registrations_rejected: Counter,
    pub messages_relayed: Counter,
    pub messages_undeliverable: Counter,
    pub malformed_frames: Counter,
    pub outbound_dropped: Counter,
    pub registry: Arc<Registry>,
}

impl RelayMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let connected_sockets = register_gauge_with_registry!(
            "sealchat_relay_connected_sockets",
            "Number of open WebSocket connections",
            registry
        )?;

        let registered_users = register_gauge_with_registry!(
            "sealchat_relay_registered_users",
            "Number of usernames currently in the directory",
            registry
        )?;

        let registrations_accepted = register_counter_with_registry!(
            "sealchat_relay_registrations_accepted_total",
            "Total number of accepted registrations",
            registry
        )?;

        let registrations_rejected = register_counter_with_registry!(
            "sealchat_relay_registrations_rejected_total",
            "Total number of rejected registrations",
            registry
        )?;

        let messages_relayed = register_counter_with_registry!(
            "sealchat_relay_messages_relayed_total",
            "Total number of private messages forwarded",
            registry
        )?;

        let messages_undeliverable = register_counter_with_registry!(
            "sealchat_relay_messages_undeliverable_total",
            "Total number of private messages addressed to an unknown recipient",
            registry
        )?;

        let malformed_frames = register_counter_with_registry!(
            "sealchat_relay_malformed_frames_total",
            "Total number of frames that failed to decode",
            registry
        )?;

        let outbound_dropped = register_counter_with_registry!(
            "sealchat_relay_outbound_dropped_total",
            "Total number of outbound events dropped on a full or closed queue",
            registry
        )?;

        Ok(Self {
            connected_sockets,
            registered_users,
            registrations_accepted,
            registrations_rejected,
            messages_relayed,
            messages_undeliverable,
            malformed_frames,
            outbound_dropped,
            registry,
        })
    }

    pub fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Registered => self.registrations_accepted.inc(),
            Outcome::RegistrationRejected => self.registrations_rejected.inc(),
            Outcome::Relayed => self.messages_relayed.inc(),
            Outcome::Undeliverable => self.messages_undeliverable.inc(),
            Outcome::Malformed => self.malformed_frames.inc(),
            Outcome::LookedUp | Outcome::LoggedOut | Outcome::Rejected => {}
        }
    }

    pub fn export_prometheus(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_map_to_counters() {
        let metrics = RelayMetrics::new().unwrap();
        metrics.record(Outcome::Registered);
        metrics.record(Outcome::Relayed);
        metrics.record(Outcome::Relayed);
        metrics.record(Outcome::Malformed);
        metrics.record(Outcome::LookedUp);

        assert_eq!(metrics.registrations_accepted.get(), 1.0);
        assert_eq!(metrics.messages_relayed.get(), 2.0);
        assert_eq!(metrics.malformed_frames.get(), 1.0);
        assert_eq!(metrics.registrations_rejected.get(), 0.0);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = RelayMetrics::new().unwrap();
        metrics.connected_sockets.set(3.0);

        let text = metrics.export_prometheus().unwrap();
        assert!(text.contains("sealchat_relay_connected_sockets 3"));
        assert!(text.contains("sealchat_relay_messages_undeliverable_total"));
    }
}
