//! # solar-bench
//!
//! MQTT client for the solar bridge used by the production test bench.
//!
//! ```text
//! src/
//! ├── device_id.rs  - device id normalization
//! ├── protocol/     - topics, envelopes, payload schemas, field decoders
//! ├── mqtt/         - broker session and the Transport seam
//! ├── bridge/       - dispatcher, response store, correlator, BridgeClient
//! ├── bench/        - test session context and result checks
//! └── config.rs     - TOML configuration
//! ```

pub mod bench;
pub mod bridge;
pub mod config;
pub mod device_id;
pub mod mqtt;
pub mod protocol;

pub use bridge::{BridgeClient, BridgeError};
pub use config::BenchConfig;
pub use device_id::{normalize, DeviceId};
