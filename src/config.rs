//! Bench configuration
//!
//! One TOML file, `~/.config/solar-bench/bridge.toml` unless a path is given.
//! Every section and field has a default, so a missing or partial file
//! still yields a usable configuration.
//!
//! ```toml
//! [bridge]
//! host = "192.168.0.20"
//! command_timeout_ms = 1500
//! attempts = 3
//!
//! [adc]
//! window_ms = 1000
//!
//! [protocol]
//! version_layout = "wide_pid"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mqtt::MqttConfig;
use crate::protocol::decode::VersionLayout;

const CONFIG_DIR: &str = "solar-bench";
const CONFIG_FILE: &str = "bridge.toml";

/// Waits longer than this make the correlator miss short telemetry timeouts.
const MAX_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BenchConfig {
    pub bridge: BridgeSettings,
    pub adc: AdcSettings,
    pub protocol: ProtocolSettings,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeSettings {
    #[serde(alias = "bridge_host")]
    pub host: String,
    #[serde(alias = "bridge_port")]
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Per-attempt deadline for correlated commands
    pub command_timeout_ms: u64,
    pub attempts: u32,
    pub poll_interval_ms: u64,
    pub subscribe_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "solar-bench".to_string(),
            keep_alive_secs: 60,
            command_timeout_ms: 1000,
            attempts: 1,
            poll_interval_ms: MAX_POLL_INTERVAL_MS,
            subscribe_timeout_ms: 1000,
            channel_capacity: 100,
        }
    }
}

impl BridgeSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Never zero and never above 100 ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            capacity: self.channel_capacity.max(1),
            ..MqttConfig::default()
        }
    }
}

/// Timing of the streamed ADC collection window.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AdcSettings {
    pub window_ms: u64,
    /// Extra wait after the window for samples still in flight
    pub margin_ms: u64,
    pub reissue_interval_ms: u64,
    /// Collection rounds before an empty buffer is returned
    pub attempts: u32,
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            margin_ms: 2000,
            reissue_interval_ms: 500,
            attempts: 1,
        }
    }
}

impl AdcSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn margin(&self) -> Duration {
        Duration::from_millis(self.margin_ms)
    }

    pub fn reissue_interval(&self) -> Duration {
        Duration::from_millis(self.reissue_interval_ms.max(1))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolSettings {
    pub version_layout: VersionLayout,
}

impl BenchConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = toml::from_str(&content)?;
        info!("Loaded bench configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path`, or the per-user file when no path is given.
    ///
    /// An explicit path that cannot be read or parsed is an error; a missing
    /// per-user file falls back to defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path).await;
        }

        let Some(default_path) = default_config_path() else {
            warn!("Could not determine config directory, using default configuration");
            return Ok(Self::default());
        };

        match tokio::fs::try_exists(&default_path).await {
            Ok(true) => Self::load(&default_path).await,
            Ok(false) => {
                debug!(
                    "No configuration at {}, using defaults",
                    default_path.display()
                );
                Ok(Self::default())
            }
            Err(e) => {
                warn!(
                    "Could not check {}: {}, using default configuration",
                    default_path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut dir| {
        dir.push(CONFIG_DIR);
        dir.push(CONFIG_FILE);
        dir
    })
}
