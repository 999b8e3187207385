use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::correlator::{publish_json, CommandRequest, Correlator};
use super::dispatcher::Dispatcher;
use super::error::BridgeError;
use super::signals::Signals;
use super::store::{Payload, ResponseStore};
use super::subscriptions::SubscriptionManager;
use crate::config::{AdcSettings, BenchConfig, BridgeSettings};
use crate::device_id::DeviceId;
use crate::mqtt::{
    inbound_channel, Connected, ConnectionState, InboundReceiver, MqttLink, Transport,
    TransportError,
};
use crate::protocol::envelope::{
    BridgeRequest, CommandClass, REQ_GET_INFO, REQ_GET_MPPT, REQ_GET_NEIGHBORS,
    REQ_SET_MESH_CONFIG, REQ_SET_MPPT, REQ_SET_MPPT_ENABLE, REQ_SHUTDOWN, STATUS_SUCCESS,
};
use crate::protocol::schema::{
    parse_neighbors, DeviceInfo, MeshConfig, MpptLimits, MpptStatus, Neighbor, ShutdownRequest,
    Stick,
};
use crate::protocol::topics;

/// Target the gateway reads as "yourself".
const GATEWAY_TARGET: &str = "0";

/// Client for the solar bridge.
///
/// Owns the inbound dispatcher task and, when built with [`connect`],
/// the broker session. Every operation can be called concurrently from
/// several tasks; failures come back as `None`, an empty `Vec` or `false`.
///
/// [`connect`]: BridgeClient::connect
pub struct BridgeClient {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<ResponseStore>,
    pub(super) subscriptions: Arc<SubscriptionManager>,
    pub(super) settings: BridgeSettings,
    pub(super) adc: AdcSettings,
    correlator: Correlator,
    dispatcher: JoinHandle<()>,
    link: Option<MqttLink<Connected>>,
}

impl BridgeClient {
    /// Opens the broker session. The only operation that fails loudly.
    pub async fn connect(config: &BenchConfig) -> Result<Self, BridgeError> {
        let mqtt = config.bridge.mqtt_config();
        let address = format!("{}:{}", mqtt.host, mqtt.port);
        let (inbound_tx, inbound_rx) = inbound_channel(mqtt.capacity);

        let link = MqttLink::create(mqtt)
            .connect(inbound_tx)
            .await
            .map_err(|source| BridgeError::Connect { address, source })?;
        let transport = link.transport().ok_or(TransportError::Closed)?;

        let mut client = Self::with_transport(Arc::new(transport), inbound_rx, config);
        client.link = Some(link);
        Ok(client)
    }

    /// Builds a client over any transport. Inbound traffic for that
    /// transport must arrive on `inbound`.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        inbound: InboundReceiver,
        config: &BenchConfig,
    ) -> Self {
        let settings = config.bridge.clone();
        let store = Arc::new(ResponseStore::new());
        let signals = Arc::new(Signals::new());
        let subscriptions = Arc::new(SubscriptionManager::new(settings.subscribe_timeout()));

        let dispatcher = Dispatcher::new(
            store.clone(),
            signals.clone(),
            subscriptions.clone(),
            config.protocol.version_layout,
        )
        .spawn(inbound);

        let correlator = Correlator::new(
            transport.clone(),
            store.clone(),
            signals,
            subscriptions.clone(),
            settings.poll_interval(),
        );

        Self {
            transport,
            store,
            subscriptions,
            settings,
            adc: config.adc.clone(),
            correlator,
            dispatcher,
            link: None,
        }
    }

    pub fn store(&self) -> &ResponseStore {
        &self.store
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.is_subscribed(topic)
    }

    /// `None` for clients built over a custom transport.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.link
            .as_ref()
            .map(|link| link.status().borrow().connection_state.clone())
    }

    /// Stops the dispatcher and closes the broker session with a DISCONNECT.
    ///
    /// Dropping the client also stops both, but without the DISCONNECT.
    pub async fn shutdown(mut self) {
        if let Some(link) = self.link.take() {
            link.shutdown().await;
        }
        self.dispatcher.abort();
        info!("Bridge client stopped");
    }

    /// Runs a correlated command with the configured timeout and attempts.
    pub async fn execute(&self, request: CommandRequest) -> Option<Payload> {
        self.correlator.execute(&request).await
    }

    fn request(&self, gateway: &str, target: &str, command: &str) -> CommandRequest {
        CommandRequest::new(gateway, target, command)
            .timeout(self.settings.command_timeout())
            .attempts(self.settings.attempts())
    }

    /// Gateways attached to the bridge host; empty on timeout.
    pub async fn list_sticks(&self) -> Vec<Stick> {
        self.subscriptions
            .ensure_subscribed(self.transport.as_ref(), &[topics::BRIDGE_RX.to_string()])
            .await;

        let attempts = self.settings.attempts();
        for attempt in 1..=attempts {
            self.store.clear_sticks();
            info!("Requesting stick list");
            if let Err(e) =
                publish_json(self.transport.as_ref(), topics::BRIDGE_TX, &BridgeRequest::ListSticks)
                    .await
            {
                warn!("Stick list request failed: {}", e);
                continue;
            }
            let deadline = Instant::now() + self.settings.command_timeout();
            if let Some(sticks) = self
                .correlator
                .wait_until(deadline, || self.store.sticks())
                .await
            {
                return sticks;
            }
            warn!("No stick list (attempt {}/{})", attempt, attempts);
        }
        Vec::new()
    }

    /// `REQ_GET_INFO` with the version word decoded.
    pub async fn get_device_info(&self, target: &str, gateway: &str) -> Option<DeviceInfo> {
        let request = self
            .request(gateway, target, REQ_GET_INFO)
            .class(CommandClass::Query);
        self.execute(request).await.map(DeviceInfo::from_payload)
    }

    /// `REQ_SHUTDOWN`. Waits for the acknowledgment unless `target` is a
    /// broadcast address.
    pub async fn req_shutdown(
        &self,
        target: &str,
        gateway: &str,
        switches: ShutdownRequest,
    ) -> Option<Payload> {
        let request = self
            .request(gateway, target, REQ_SHUTDOWN)
            .class(CommandClass::Action)
            .args(switches.to_args());
        self.execute(request).await
    }

    /// `REQ_SET_MESH_CONFIG`. Returns the configuration the device echoed
    /// back; comparing it with `config` is the caller's job.
    pub async fn set_mesh_config(
        &self,
        target: &str,
        gateway: &str,
        config: &MeshConfig,
    ) -> Option<MeshConfig> {
        let request = self
            .request(gateway, target, REQ_SET_MESH_CONFIG)
            .class(CommandClass::Query)
            .args(config.to_args());
        self.execute(request)
            .await
            .map(|payload| MeshConfig::from_payload(&payload))
    }

    pub async fn get_mppt_status(&self, target: &str, gateway: &str) -> Option<MpptStatus> {
        let request = self
            .request(gateway, target, REQ_GET_MPPT)
            .class(CommandClass::Query);
        let payload = self.execute(request).await?;
        let status = MpptStatus::from_payload(&payload);
        if status.is_none() {
            warn!("Unreadable MPPT status from {}", DeviceId::parse_lossy(target));
        }
        status
    }

    pub async fn set_mppt_config(&self, target: &str, gateway: &str, limits: MpptLimits) -> bool {
        let request = self
            .request(gateway, target, REQ_SET_MPPT)
            .class(CommandClass::Action)
            .args(limits.to_args());
        self.execute(request).await.is_some()
    }

    pub async fn enable_mppt(&self, target: &str, gateway: &str, enable: bool) -> bool {
        let mut args = Payload::new();
        args.insert("enable".into(), Value::Bool(enable));
        let request = self
            .request(gateway, target, REQ_SET_MPPT_ENABLE)
            .class(CommandClass::Action)
            .args(args);
        self.execute(request).await.is_some()
    }

    /// Devices the gateway currently hears.
    pub async fn get_neighbors(&self, gateway: &str) -> Vec<Neighbor> {
        let request = self
            .request(gateway, GATEWAY_TARGET, REQ_GET_NEIGHBORS)
            .class(CommandClass::Query);
        match self.execute(request).await {
            Some(payload) => parse_neighbors(&payload),
            None => Vec::new(),
        }
    }

    /// Empties the gateway's neighbor table.
    pub async fn clear_neighbors(&self, gateway: &str) -> bool {
        self.subscriptions
            .ensure_subscribed(self.transport.as_ref(), &[topics::BRIDGE_RX.to_string()])
            .await;
        self.store.clear_neighbor_state(gateway);

        let message = BridgeRequest::ClearNeighbors {
            stick_id: gateway.to_string(),
        };
        info!("Clearing neighbors on {}", gateway);
        if let Err(e) = publish_json(self.transport.as_ref(), topics::BRIDGE_TX, &message).await {
            warn!("Clear-neighbors request for {} failed: {}", gateway, e);
            return false;
        }

        let deadline = Instant::now() + self.settings.command_timeout();
        match self
            .correlator
            .wait_until(deadline, || self.store.neighbor_clear(gateway))
            .await
        {
            Some(status) if status == STATUS_SUCCESS => true,
            Some(status) => {
                warn!("Clearing neighbors on {} reported {}", gateway, status);
                false
            }
            None => {
                warn!("No clear-neighbors acknowledgment from {}", gateway);
                false
            }
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Bridge client dropped, stopping event loop driver");
            link.abort();
        }
        self.dispatcher.abort();
    }
}
