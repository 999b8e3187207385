//! In-memory bridge for integration tests.
//!
//! `MockBridge` implements `Transport`: it records everything published,
//! acknowledges subscriptions, and answers publishes through a scripted
//! responder by pushing messages onto the client's inbound channel.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use solar_bench::mqtt::{
    inbound_channel, InboundEvent, InboundSender, MqttMessage, Transport, TransportError,
};
use solar_bench::{BenchConfig, BridgeClient};

pub type Reply = (String, Value);
pub type DelayedReply = (Duration, String, Value);
type Responder = Box<dyn FnMut(&str, &Value) -> Vec<Reply> + Send>;
type DelayedResponder = Box<dyn FnMut(&str, &Value) -> Vec<DelayedReply> + Send>;

/// What the client put on the wire, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Subscribe(String),
    Publish(String),
}

/// How the bridge answers SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackMode {
    Grant,
    Reject,
    Silent,
}

pub struct MockBridge {
    inbound: InboundSender,
    published: Mutex<Vec<Reply>>,
    subscribed: Mutex<Vec<String>>,
    wire: Mutex<Vec<WireEvent>>,
    responder: Mutex<Option<Responder>>,
    delayed: Mutex<Option<DelayedResponder>>,
    suback: SubackMode,
}

impl MockBridge {
    pub fn published(&self) -> Vec<Reply> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn wire(&self) -> Vec<WireEvent> {
        self.wire.lock().unwrap().clone()
    }

    /// Position of the SUBSCRIBE for `topic` in the wire log.
    pub fn subscribe_position(&self, topic: &str) -> Option<usize> {
        self.wire()
            .iter()
            .position(|e| *e == WireEvent::Subscribe(topic.to_string()))
    }

    /// Position of the first publish on `topic` in the wire log.
    pub fn first_publish_position(&self, topic: &str) -> Option<usize> {
        self.wire()
            .iter()
            .position(|e| *e == WireEvent::Publish(topic.to_string()))
    }

    /// True once the client has stopped draining inbound traffic.
    pub fn inbound_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    pub fn respond_with(
        &self,
        responder: impl FnMut(&str, &Value) -> Vec<Reply> + Send + 'static,
    ) {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Like `respond_with`, but each reply is delivered after its delay.
    pub fn respond_later(
        &self,
        responder: impl FnMut(&str, &Value) -> Vec<DelayedReply> + Send + 'static,
    ) {
        *self.delayed.lock().unwrap() = Some(Box::new(responder));
    }

    /// Delivers an unsolicited message, as if the bridge had published it.
    pub async fn inject(&self, topic: &str, payload: Value) {
        self.inbound
            .send(InboundEvent::Message(MqttMessage::new(
                topic,
                payload.to_string().into_bytes(),
            )))
            .await
            .unwrap();
    }
}

#[async_trait]
impl Transport for MockBridge {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let value: Value = serde_json::from_slice(&payload).unwrap();
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), value.clone()));
        self.wire
            .lock()
            .unwrap()
            .push(WireEvent::Publish(topic.to_string()));

        let replies = match self.responder.lock().unwrap().as_mut() {
            Some(responder) => responder(topic, &value),
            None => Vec::new(),
        };
        for (reply_topic, reply) in replies {
            self.inject(&reply_topic, reply).await;
        }

        let later = match self.delayed.lock().unwrap().as_mut() {
            Some(responder) => responder(topic, &value),
            None => Vec::new(),
        };
        for (delay, reply_topic, reply) in later {
            let inbound = self.inbound.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let message = MqttMessage::new(reply_topic, reply.to_string().into_bytes());
                let _ = inbound.send(InboundEvent::Message(message)).await;
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscribed.lock().unwrap().push(topic.to_string());
        self.wire
            .lock()
            .unwrap()
            .push(WireEvent::Subscribe(topic.to_string()));
        let accepted = match self.suback {
            SubackMode::Grant => true,
            SubackMode::Reject => false,
            SubackMode::Silent => return Ok(()),
        };
        self.inbound
            .send(InboundEvent::SubscribeAck { accepted })
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}

pub fn test_config() -> BenchConfig {
    let mut config = BenchConfig::default();
    config.bridge.command_timeout_ms = 1000;
    config.bridge.attempts = 1;
    config
}

pub fn harness(config: &BenchConfig) -> (BridgeClient, Arc<MockBridge>) {
    build(config, SubackMode::Grant)
}

/// A bridge that never acknowledges SUBSCRIBE.
pub fn harness_without_subacks(config: &BenchConfig) -> (BridgeClient, Arc<MockBridge>) {
    build(config, SubackMode::Silent)
}

/// A bridge whose broker refuses every subscription.
pub fn harness_rejecting_subscriptions(config: &BenchConfig) -> (BridgeClient, Arc<MockBridge>) {
    build(config, SubackMode::Reject)
}

fn build(config: &BenchConfig, suback: SubackMode) -> (BridgeClient, Arc<MockBridge>) {
    let (tx, rx) = inbound_channel(100);
    let bridge = Arc::new(MockBridge {
        inbound: tx,
        published: Mutex::new(Vec::new()),
        subscribed: Mutex::new(Vec::new()),
        wire: Mutex::new(Vec::new()),
        responder: Mutex::new(None),
        delayed: Mutex::new(None),
        suback,
    });
    let client = BridgeClient::with_transport(bridge.clone(), rx, config);
    (client, bridge)
}

/// A nested data reply as the gateway sends it on `solar/device/<gw>/rx`.
pub fn data_reply(source: &str, cmd_name: &str, payload: Value) -> Value {
    json!({
        "mlpe_id": source,
        "parsed_data": {"cmd_name": cmd_name, "payload": payload}
    })
}

pub fn command_of(message: &Value) -> &str {
    message["command"].as_str().unwrap_or_default()
}
