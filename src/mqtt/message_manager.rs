use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc;

/// One message delivered by the broker.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(64).collect();
        write!(
            f,
            "{} {} - {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            preview
        )
    }
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Local::now(),
        }
    }
}

/// Everything the transport reports to the inbound dispatcher, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    /// A PUBLISH on one of our subscriptions
    Message(MqttMessage),
    /// The broker answered a SUBSCRIBE; `accepted` is false if any filter was refused
    SubscribeAck { accepted: bool },
    /// A (re)connection was accepted; broker-side subscriptions start empty
    Connected,
    /// The session dropped; the transport keeps trying to reconnect
    Disconnected(String),
}

pub type InboundSender = mpsc::Sender<InboundEvent>;
pub type InboundReceiver = mpsc::Receiver<InboundEvent>;

pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundReceiver) {
    mpsc::channel(capacity)
}
