//! Configuration for the fleet supervisor
//!
//! Combines broker connection settings, the topic root shared with the
//! launcher and the simulators, and the wait budget used by destructive
//! operations.

use std::time::Duration;

use uuid::Uuid;

/// Default topic root shared by the launcher and the simulated charge points
pub const DEFAULT_TOPIC_ROOT: &str = "cp_simu";

/// Default broker URL
pub const DEFAULT_BROKER_URL: &str = "mqtt://127.0.0.1:1883";

/// Complete supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Broker URL (`mqtt://host:port`)
    pub broker_url: String,

    /// Root prefix of every topic
    pub topic_root: String,

    // MQTT settings
    pub mqtt: MqttConfig,

    // Kill/remove confirmation settings
    pub reconcile: ReconcileConfig,
}

/// MQTT client configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Client identifier presented to the broker
    pub client_id: String,

    /// Keep-alive interval
    pub keep_alive: Duration,

    /// Start with a clean session
    pub clean_session: bool,

    /// Initial reconnect delay
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,

    /// Capacity of the client request and event channels
    pub channel_capacity: usize,
}

/// Bounded wait used while the launcher confirms kills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Interval between two checks of the model
    pub poll_interval: Duration,

    /// Number of checks before giving up
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            topic_root: DEFAULT_TOPIC_ROOT.to_string(),
            mqtt: MqttConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: random_client_id(),
            keep_alive: Duration::from_secs(10),
            clean_session: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(10),
            channel_capacity: 64,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 4,
        }
    }
}

impl ReconcileConfig {
    /// Total time a caller may stay blocked waiting for confirmation
    pub fn budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl SupervisorConfig {
    /// Create config for the given broker
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Default::default()
        }
    }

    /// Set topic root
    pub fn with_topic_root(mut self, root: impl Into<String>) -> Self {
        self.topic_root = root.into();
        self
    }

    /// Set MQTT client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.mqtt.client_id = client_id.into();
        self
    }

    /// Set keep-alive interval
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.mqtt.keep_alive = keep_alive;
        self
    }

    /// Set the confirmation wait budget
    pub fn with_reconcile(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.reconcile = ReconcileConfig {
            poll_interval,
            max_attempts,
        };
        self
    }
}

fn random_client_id() -> String {
    format!("mqtt-client-{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SupervisorConfig::new("mqtt://broker:1884")
            .with_topic_root("lab")
            .with_client_id("supervisor-1")
            .with_reconcile(Duration::from_millis(100), 2);

        assert_eq!(config.broker_url, "mqtt://broker:1884");
        assert_eq!(config.topic_root, "lab");
        assert_eq!(config.mqtt.client_id, "supervisor-1");
        assert_eq!(config.reconcile.budget(), Duration::from_millis(200));
    }

    #[test]
    fn test_default_budget() {
        let config = SupervisorConfig::default();
        assert_eq!(config.topic_root, "cp_simu");
        assert_eq!(config.reconcile.max_attempts, 4);
        assert_eq!(config.reconcile.budget(), Duration::from_secs(2));
        assert!(config.mqtt.client_id.starts_with("mqtt-client-"));
    }
}
