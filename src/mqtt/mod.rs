//! # MQTT transport
//!
//! The bridge is only reachable over MQTT. This module owns the broker
//! session and nothing else: it knows topics as opaque strings and payloads
//! as bytes.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - broker connection parameters
//! ├── message_manager.rs  - inbound message / event types and channel
//! ├── transport.rs        - the outbound Transport trait and its rumqttc impl
//! └── mqtt_handler.rs     - session state machine and event-loop driver
//! ```
//!
//! Inbound traffic is strictly serialized: the driver task forwards broker
//! events one at a time over a bounded channel, and a single consumer (the
//! bridge dispatcher) drains it.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;

pub use config::MqttConfig;
pub use message_manager::{inbound_channel, InboundEvent, InboundReceiver, InboundSender, MqttMessage};
pub use mqtt_handler::{Configured, Connected, ConnectionState, LinkStatus, MqttLink};
pub use transport::{MqttTransport, Transport, TransportError};
