use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

/// Errors raised by the transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker session could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The request queue towards the event loop is gone
    #[error("Transport closed")]
    Closed,
}

/// Outbound half of a publish/subscribe transport.
///
/// Inbound traffic does not come back through this trait; it arrives as
/// [`InboundEvent`](super::message_manager::InboundEvent)s on the channel
/// handed to the transport at connect time. Both methods only enqueue the
/// request and must be safe to call from several tasks at once.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Requests a subscription. Completion is signalled later by an
    /// `InboundEvent::SubscribeAck`.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
}

/// [`Transport`] over a rumqttc client.
#[derive(Clone, Debug)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}
