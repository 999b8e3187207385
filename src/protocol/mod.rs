//! # Bridge wire protocol
//!
//! Everything that is a contract with the bridge process lives here, free of
//! any I/O:
//!
//! ```text
//! protocol/
//! ├── topics.rs    - topic builders and the inbound topic classifier
//! ├── envelope.rs  - outbound command / control / feature messages
//! ├── schema.rs    - normalized inbound payloads, naming-variant adapters
//! └── decode.rs    - version word and beacon ADC word decoders
//! ```

pub mod decode;
pub mod envelope;
pub mod schema;
pub mod topics;
