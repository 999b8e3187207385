use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broker connection parameters for the bridge's MQTT endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// How long the initial CONNACK may take before startup fails
    pub connect_timeout: Duration,
    /// Request and inbound channel capacity
    pub capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "solar-bench".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            capacity: 100,
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}
