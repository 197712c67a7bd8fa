//! Prometheus metrics for the hub, rendered at `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct HubMetrics {
    pub sessions: IntGauge,
    pub online_users: IntGauge,
    pub evictions: IntCounter,
    pub broadcasts: IntCounter,
    /// Labelled `direction` = `online` | `offline`.
    pub presence_transitions: IntCounterVec,
}

impl HubMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let sessions = IntGauge::new("hub_sessions", "Sessions currently registered with the hub")?;
        let online_users = IntGauge::new("hub_online_users", "Users with at least one session")?;
        let evictions = IntCounter::new(
            "hub_evictions_total",
            "Sessions dropped because their mailbox was full or closed",
        )?;
        let broadcasts = IntCounter::new("hub_broadcasts_total", "Broadcast requests processed")?;
        let presence_transitions = IntCounterVec::new(
            Opts::new(
                "hub_presence_transitions_total",
                "Users crossing zero sessions in either direction",
            ),
            &["direction"],
        )?;

        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(online_users.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(broadcasts.clone()))?;
        registry.register(Box::new(presence_transitions.clone()))?;

        Ok(Self {
            sessions,
            online_users,
            evictions,
            broadcasts,
            presence_transitions,
        })
    }
}

/// Text exposition of everything in `registry`.
pub fn render(registry: &Registry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_show_up_in_exposition() {
        let registry = Registry::new();
        let metrics = HubMetrics::new(&registry).unwrap();
        metrics.evictions.inc();
        metrics
            .presence_transitions
            .with_label_values(&["online"])
            .inc();

        let text = render(&registry).unwrap();
        assert!(text.contains("hub_evictions_total 1"));
        assert!(text.contains(r#"hub_presence_transitions_total{direction="online"} 1"#));
    }

    #[test]
    fn registering_twice_fails() {
        let registry = Registry::new();
        HubMetrics::new(&registry).unwrap();
        assert!(HubMetrics::new(&registry).is_err());
    }
}
