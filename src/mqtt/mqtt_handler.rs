//! Broker session lifecycle
//!
//! ```text
//! MqttLink<Configured> ──connect()──► MqttLink<Connected> ──shutdown()──► (dropped)
//!                            │
//!                            └── spawns the event-loop driver task
//! ```
//!
//! The driver task is the only place `EventLoop::poll` is called. It turns
//! broker traffic into [`InboundEvent`]s, in order, on the inbound channel,
//! and keeps polling through connection errors so rumqttc can reconnect.

use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, SubAck,
    SubscribeReasonCode,
};
use statum::{machine, state};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{InboundEvent, InboundSender, MqttMessage};
use super::transport::{MqttTransport, TransportError};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct LinkStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured,
    Connected,
}

#[machine]
pub struct MqttLink<S: LinkState> {
    config: MqttConfig,
    client: Option<AsyncClient>,
    shutdown: CancellationToken,
    driver: Option<JoinHandle<()>>,
    status: watch::Sender<LinkStatus>,
}

impl<S: LinkState> MqttLink<S> {
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }
}

impl MqttLink<Configured> {
    pub fn create(config: MqttConfig) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());
        Self::new(config, None, CancellationToken::new(), None, status)
    }

    /// Opens the broker session and starts the driver task.
    ///
    /// Fails when the broker refuses or does not answer within
    /// `connect_timeout`; the caller decides whether that is fatal.
    pub async fn connect(
        mut self,
        inbound: InboundSender,
    ) -> Result<MqttLink<Connected>, TransportError> {
        info!(
            "Connecting to bridge broker at {}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );
        self.status
            .send_modify(|s| s.connection_state = ConnectionState::Connecting);

        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(options, self.config.capacity);

        match tokio::time::timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop))
            .await
        {
            Ok(Ok(())) => info!("Bridge broker session established"),
            Ok(Err(e)) => {
                error!("Failed to connect to bridge broker: {}", e);
                self.status.send_modify(|s| {
                    s.connection_state = ConnectionState::Disconnected;
                    s.last_error = Some(e.to_string());
                });
                return Err(e);
            }
            Err(_) => {
                error!(
                    "Bridge broker did not answer within {:?}",
                    self.config.connect_timeout
                );
                self.status
                    .send_modify(|s| s.connection_state = ConnectionState::Disconnected);
                return Err(TransportError::Connection(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.config.host, self.config.port, self.config.connect_timeout
                )));
            }
        }

        self.status.send_modify(|s| {
            s.connection_state = ConnectionState::Connected;
            s.last_activity = Some(Local::now());
        });

        let driver = tokio::spawn(drive_event_loop(
            eventloop,
            inbound,
            self.shutdown.clone(),
            self.status.clone(),
        ));
        self.client = Some(client);
        self.driver = Some(driver);

        debug!("Event loop driver spawned, transitioning to Connected state");
        Ok(self.transition())
    }
}

impl MqttLink<Connected> {
    /// Stops the driver task without sending DISCONNECT. The socket closes
    /// when the driver drops its event loop.
    pub fn abort(&self) {
        self.shutdown.cancel();
    }

    /// Handle for publishing and subscribing on this session.
    pub fn transport(&self) -> Option<MqttTransport> {
        self.client.clone().map(MqttTransport::new)
    }

    /// Sends DISCONNECT and stops the driver task.
    pub async fn shutdown(mut self) {
        info!("Closing bridge broker session");
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!("Failed to send DISCONNECT: {}", e);
            }
        }
        self.shutdown.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Event loop driver ended abnormally: {}", e);
            }
        }
        self.status
            .send_modify(|s| s.connection_state = ConnectionState::Disconnected);
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}

fn suback_accepted(ack: &SubAck) -> bool {
    ack.return_codes
        .iter()
        .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    inbound: InboundSender,
    shutdown: CancellationToken,
    status: watch::Sender<LinkStatus>,
) {
    debug!("Starting bridge event loop driver");
    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => break,
            notification = eventloop.poll() => notification,
        };

        let event = match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                status.send_modify(|s| {
                    s.messages_received += 1;
                    s.last_activity = Some(Local::now());
                });
                Some(InboundEvent::Message(MqttMessage::new(
                    publish.topic,
                    publish.payload.to_vec(),
                )))
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let accepted = suback_accepted(&ack);
                if accepted {
                    debug!("SUBACK pkid={}", ack.pkid);
                } else {
                    warn!("SUBACK pkid={} refused: {:?}", ack.pkid, ack.return_codes);
                }
                Some(InboundEvent::SubscribeAck { accepted })
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Bridge broker session re-established");
                status.send_modify(|s| s.connection_state = ConnectionState::Connected);
                Some(InboundEvent::Connected)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Bridge broker connection error: {}", e);
                status.send_modify(|s| {
                    s.connection_state = ConnectionState::Reconnecting;
                    s.last_error = Some(e.to_string());
                });
                if inbound
                    .send(InboundEvent::Disconnected(e.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
                None
            }
        };

        if let Some(event) = event {
            if inbound.send(event).await.is_err() {
                debug!("Inbound dispatcher gone, stopping event loop driver");
                break;
            }
        }
    }
    info!("Bridge event loop driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::message_manager::inbound_channel;
    use rumqttc::QoS;

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let config = MqttConfig {
            connect_timeout: Duration::from_secs(2),
            ..MqttConfig::new("127.0.0.1", 1)
        };
        let link = MqttLink::create(config);
        let status = link.status();
        let (tx, _rx) = inbound_channel(4);

        let err = link.connect(tx).await.err().unwrap();
        assert!(matches!(err, TransportError::Connection(_)));
        assert_eq!(status.borrow().connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn suback_with_failure_code_is_refused() {
        let granted = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert!(suback_accepted(&granted));

        let refused = SubAck::new(
            2,
            vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        assert!(!suback_accepted(&refused));
    }
}
