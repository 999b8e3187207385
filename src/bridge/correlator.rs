//! Command/response correlation
//!
//! Each call to [`Correlator::execute`] runs this state machine:
//!
//! ```text
//!  normalize target ─► ensure subscribed ─┬─► clear stale entries ─► publish ─► wait ──┐
//!                                         │                                            │
//!                                         └──────────── retry while attempts remain ◄──┤
//!                                                                                      │
//!        Some(payload) ◄── reply stored, or SUCCESS for an action ◄────────────────────┘
//!        None          ◄── every attempt rejected or timed out
//! ```
//!
//! Waiting never blocks on a single primitive: the loop wakes on any
//! dispatcher signal or after `poll_interval`, whichever comes first, and
//! re-checks the store each time.
//!
//! Clearing the key before each attempt keeps a reply to an earlier attempt
//! from being read as new. A reply to an earlier attempt that arrives after
//! the clear is still accepted.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::BridgeError;
use super::signals::Signals;
use super::store::{Payload, ResponseStore};
use super::subscriptions::SubscriptionManager;
use crate::device_id::DeviceId;
use crate::mqtt::Transport;
use crate::protocol::envelope::{
    response_name, CommandClass, CommandEnvelope, RoutingClass, STATUS_SUCCESS,
};
use crate::protocol::topics;

/// Serializes `message` as JSON and publishes it.
pub(crate) async fn publish_json<T>(
    transport: &dyn Transport,
    topic: &str,
    message: &T,
) -> Result<(), BridgeError>
where
    T: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_vec(message)?;
    transport.publish(topic, payload).await?;
    Ok(())
}

/// `{"status": "SUCCESS"}`, returned when no data reply is expected.
pub fn synthetic_success() -> Payload {
    let mut payload = Payload::new();
    payload.insert("status".into(), Value::String(STATUS_SUCCESS.to_string()));
    payload
}

/// One correlated command.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub gateway: String,
    /// Any accepted spelling; normalized before use.
    pub target: String,
    pub command: String,
    pub class: CommandClass,
    pub args: Payload,
    /// Per-attempt deadline
    pub timeout: Duration,
    pub attempts: u32,
}

impl CommandRequest {
    /// Class is derived from the command name; one attempt of one second.
    pub fn new(gateway: &str, target: &str, command: &str) -> Self {
        Self {
            gateway: gateway.to_string(),
            target: target.to_string(),
            command: command.to_string(),
            class: CommandClass::from_name(command),
            args: Payload::new(),
            timeout: Duration::from_secs(1),
            attempts: 1,
        }
    }

    pub fn class(mut self, class: CommandClass) -> Self {
        self.class = class;
        self
    }

    pub fn args(mut self, args: Payload) -> Self {
        self.args = args;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Response(Payload),
    /// The gateway reported a non-success status for the command.
    Rejected(String),
    TimedOut,
    PublishFailed,
}

#[derive(Clone)]
pub struct Correlator {
    transport: Arc<dyn Transport>,
    store: Arc<ResponseStore>,
    signals: Arc<Signals>,
    subscriptions: Arc<SubscriptionManager>,
    poll_interval: Duration,
}

impl Correlator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ResponseStore>,
        signals: Arc<Signals>,
        subscriptions: Arc<SubscriptionManager>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            signals,
            subscriptions,
            poll_interval,
        }
    }

    /// Runs the command to completion. `None` means every attempt failed.
    pub async fn execute(&self, request: &CommandRequest) -> Option<Payload> {
        let target = DeviceId::parse_lossy(&request.target);
        let routing = RoutingClass::for_target(target);
        let reply_name = response_name(&request.command);

        let mut reply_topics = vec![
            topics::device_rx(&request.gateway),
            topics::device_result(&request.gateway),
        ];
        if routing == RoutingClass::Addressed {
            reply_topics.push(topics::mlpe_rx(&target.to_string()));
        }
        self.subscriptions
            .ensure_subscribed(self.transport.as_ref(), &reply_topics)
            .await;

        let attempts = request.attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = self.attempt(request, target, routing, &reply_name).await;
            match outcome {
                AttemptOutcome::Response(payload) => return Some(payload),
                AttemptOutcome::Rejected(status) => warn!(
                    "{} to {} rejected with {} (attempt {}/{})",
                    request.command, target, status, attempt, attempts
                ),
                AttemptOutcome::TimedOut => warn!(
                    "{} to {} timed out after {:?} (attempt {}/{})",
                    request.command, target, request.timeout, attempt, attempts
                ),
                AttemptOutcome::PublishFailed => warn!(
                    "{} to {} could not be sent (attempt {}/{})",
                    request.command, target, attempt, attempts
                ),
            }
        }

        warn!(
            "{} to {} via {} gave no result after {} attempts",
            request.command, target, request.gateway, attempts
        );
        None
    }

    async fn attempt(
        &self,
        request: &CommandRequest,
        target: DeviceId,
        routing: RoutingClass,
        reply_name: &str,
    ) -> AttemptOutcome {
        self.store.clear_response(target, reply_name);
        self.store.clear_result(&request.command);

        let envelope = CommandEnvelope::new(&request.command, target, request.args.clone());
        info!(
            "Sending {} to {} via {}",
            request.command, target, request.gateway
        );
        if let Err(e) = publish_json(
            self.transport.as_ref(),
            &topics::device_tx(&request.gateway),
            &envelope,
        )
        .await
        {
            warn!("Publish of {} failed: {}", request.command, e);
            return AttemptOutcome::PublishFailed;
        }

        // nobody acknowledges a broadcast
        if routing == RoutingClass::Broadcast && request.class == CommandClass::Action {
            debug!("{} broadcast, not waiting for acknowledgment", request.command);
            return AttemptOutcome::Response(synthetic_success());
        }

        let deadline = Instant::now() + request.timeout;
        self.wait_until(deadline, || self.check(request, target, routing, reply_name))
            .await
            .unwrap_or(AttemptOutcome::TimedOut)
    }

    fn check(
        &self,
        request: &CommandRequest,
        target: DeviceId,
        routing: RoutingClass,
        reply_name: &str,
    ) -> Option<AttemptOutcome> {
        let reply = match routing {
            RoutingClass::Addressed => self
                .store
                .response(target, reply_name)
                .or_else(|| self.store.unattributed_response(reply_name)),
            RoutingClass::Broadcast => self.store.latest_response(reply_name),
        };
        if let Some(payload) = reply {
            return Some(AttemptOutcome::Response(payload));
        }

        match self.store.result(&request.command) {
            Some(status) if status == STATUS_SUCCESS => match request.class {
                CommandClass::Action => Some(AttemptOutcome::Response(synthetic_success())),
                // a query keeps waiting for its data
                CommandClass::Query => None,
            },
            Some(status) => Some(AttemptOutcome::Rejected(status)),
            None => None,
        }
    }

    /// Re-runs `check` on every dispatcher signal and every `poll_interval`
    /// until it yields a value or `deadline` passes.
    pub(crate) async fn wait_until<T>(
        &self,
        deadline: Instant,
        mut check: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        loop {
            if let Some(value) = check() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = self.signals.any() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults_follow_command_name() {
        let query = CommandRequest::new("S1", "0x10", "REQ_GET_INFO");
        assert_eq!(query.class, CommandClass::Query);
        assert_eq!(query.attempts, 1);

        let action = CommandRequest::new("S1", "0x10", "REQ_SHUTDOWN").attempts(0);
        assert_eq!(action.class, CommandClass::Action);
        assert_eq!(action.attempts, 1);
    }

    #[test]
    fn synthetic_success_shape() {
        assert_eq!(Value::Object(synthetic_success()), json!({"status": "SUCCESS"}));
    }
}
