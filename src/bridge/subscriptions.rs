//! Subscription barrier
//!
//! A SUBSCRIBE is acknowledged asynchronously. Publishing a command before
//! its reply topic is live lets the reply slip past unseen, so every command
//! path calls [`SubscriptionManager::ensure_subscribed`] first.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::mqtt::Transport;

#[derive(Debug)]
pub struct SubscriptionManager {
    subscribed: Mutex<HashSet<String>>,
    /// One SUBSCRIBE in flight at a time, so the next SUBACK is ours.
    gate: tokio::sync::Mutex<()>,
    /// Outcome of the most recent SUBACK
    acks: watch::Sender<bool>,
    timeout: Duration,
}

impl SubscriptionManager {
    pub fn new(timeout: Duration) -> Self {
        let (acks, _) = watch::channel(false);
        Self {
            subscribed: Mutex::new(HashSet::new()),
            gate: tokio::sync::Mutex::new(()),
            acks,
            timeout,
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// Called by the dispatcher for every SUBACK.
    pub fn on_subscribe_ack(&self, accepted: bool) {
        self.acks.send_replace(accepted);
    }

    /// Forgets every subscription; the broker starts a clean session on reconnect.
    pub fn reset(&self) {
        self.subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Subscribes to every topic not already live and waits for each SUBACK.
    ///
    /// Returns `false` if any subscription failed, was refused or went
    /// unacknowledged. Callers publish anyway: a late SUBACK does not mean
    /// the subscription is missing. Such topics are retried on the next call.
    pub async fn ensure_subscribed(&self, transport: &dyn Transport, topics: &[String]) -> bool {
        let mut all_confirmed = true;
        for topic in topics {
            if self.is_subscribed(topic) {
                continue;
            }

            let _in_flight = self.gate.lock().await;
            // another caller may have finished it while we queued
            if self.is_subscribed(topic) {
                continue;
            }

            let mut acks = self.acks.subscribe();
            if let Err(e) = transport.subscribe(topic).await {
                warn!("Subscribe request for {} failed: {}", topic, e);
                all_confirmed = false;
                continue;
            }

            match tokio::time::timeout(self.timeout, acks.changed()).await {
                Ok(Ok(())) => {
                    if *acks.borrow_and_update() {
                        debug!("Subscribed to {}", topic);
                        self.subscribed
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(topic.clone());
                    } else {
                        warn!("Broker refused subscription to {}", topic);
                        all_confirmed = false;
                    }
                }
                _ => {
                    warn!(
                        "No SUBACK for {} within {:?}, continuing without confirmation",
                        topic, self.timeout
                    );
                    all_confirmed = false;
                }
            }
        }
        all_confirmed
    }
}
