//! # Bridge client
//!
//! Two execution contexts that only meet in the response store:
//!
//! ```text
//!   broker ──► mqtt driver ──► inbound channel ──► Dispatcher ──► ResponseStore + Signals
//!                                                                         │
//!   caller ──► BridgeClient op ──► Correlator ──► SubscriptionManager     │
//!                                      │                                  │
//!                                      ├──► Transport::publish            │
//!                                      └──◄ poll store / wait on signals ◄┘
//! ```
//!
//! ```text
//! bridge/
//! ├── client.rs         - BridgeClient and the named operations
//! ├── correlator.rs     - publish, wait, retry
//! ├── dispatcher.rs     - inbound routing into the store
//! ├── store.rs          - response cache, result status, sample buffers
//! ├── subscriptions.rs  - subscribe-before-publish barrier
//! ├── signals.rs        - response / result wake-ups
//! ├── adc.rs            - timed ADC sample collection
//! └── error.rs
//! ```

pub mod adc;
pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod signals;
pub mod store;
pub mod subscriptions;

pub use adc::AdcSample;
pub use client::BridgeClient;
pub use correlator::{AttemptOutcome, CommandRequest, Correlator};
pub use dispatcher::Dispatcher;
pub use error::BridgeError;
pub use signals::Signals;
pub use store::{Payload, ResponseStore};
pub use subscriptions::SubscriptionManager;
