use crate::mqtt::TransportError;

/// Errors surfaced by [`BridgeClient`](super::BridgeClient).
///
/// Only construction returns these to callers. Inside an operation they are
/// logged and count as a failed attempt.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Could not connect to bridge broker at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
