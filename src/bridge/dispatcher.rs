//! Inbound dispatcher
//!
//! Runs as a single task draining the inbound channel, so messages are
//! handled strictly one at a time. It is the only writer of the response
//! store apart from the correlator's clears, and it never calls back into
//! callers: all it does is store, then raise a signal.
//!
//! ```text
//! solar/bridge/rx              ─► sticks / neighbor list / clear ack ─► response signal
//! solar/device/<gw>/result     ─► command result status             ─► result signal
//! solar/device/<gw>/rx         ┐
//! solar/mlpe/<id>/rx           ┴► decoded reply by (target, command) ─► response signal (RESP_*)
//! solar/mlpe/<id>/adc          ─► sample buffer                       (no signal)
//! solar/feature/<gw>/status    ─► result status under feature name   ─► result signal
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::adc::AdcSample;
use super::signals::Signals;
use super::store::ResponseStore;
use super::subscriptions::SubscriptionManager;
use crate::device_id::DeviceId;
use crate::mqtt::{InboundEvent, InboundReceiver};
use crate::protocol::decode::{annotate_beacon, annotate_version, VersionLayout};
use crate::protocol::envelope::{
    BEACON_RAW_DATA, RESP_GET_INFO, RESP_GET_NEIGHBORS, STATUS_SUCCESS,
};
use crate::protocol::schema::{
    parse_neighbors, parse_stick_list, DataReply, FeatureStatusReport, ResultReport,
};
use crate::protocol::topics::Topic;

const CLEAR_NEIGHBORS_ACK: &str = "CLEAR_NEIGHBORS_ACK";

pub struct Dispatcher {
    store: Arc<ResponseStore>,
    signals: Arc<Signals>,
    subscriptions: Arc<SubscriptionManager>,
    layout: VersionLayout,
}

impl Dispatcher {
    pub fn new(
        store: Arc<ResponseStore>,
        signals: Arc<Signals>,
        subscriptions: Arc<SubscriptionManager>,
        layout: VersionLayout,
    ) -> Self {
        Self {
            store,
            signals,
            subscriptions,
            layout,
        }
    }

    pub fn spawn(self, inbound: InboundReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound))
    }

    async fn run(self, mut inbound: InboundReceiver) {
        debug!("Bridge dispatcher started");
        while let Some(event) = inbound.recv().await {
            self.handle_event(event);
        }
        info!("Inbound channel closed, bridge dispatcher stopped");
    }

    pub fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => {
                trace!("Inbound {}", message);
                self.handle_message(&message.topic, &message.payload)
            }
            InboundEvent::SubscribeAck { accepted } => {
                self.subscriptions.on_subscribe_ack(accepted)
            }
            InboundEvent::Connected => {
                info!("Broker session restarted, subscriptions will be renewed");
                self.subscriptions.reset();
            }
            InboundEvent::Disconnected(reason) => debug!("Transport disconnected: {}", reason),
        }
    }

    /// Handles one PUBLISH. Undecodable payloads and unknown topics are dropped.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some(kind) = Topic::parse(topic) else {
            trace!("Ignoring message on {}", topic);
            return;
        };
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Dropping malformed payload on {}: {}", topic, e);
                return;
            }
        };

        match kind {
            Topic::BridgeRx => self.on_bridge_reply(value),
            Topic::DeviceResult { .. } => self.on_result(topic, value),
            Topic::DeviceRx { gateway } => self.on_data_reply(topic, value, Some(&gateway), None),
            Topic::MlpeRx { device } => self.on_data_reply(topic, value, None, Some(&device)),
            Topic::MlpeAdc { device } => self.on_sample(topic, value, &device),
            Topic::FeatureStatus { .. } => self.on_feature_status(topic, value),
        }
    }

    fn on_bridge_reply(&self, value: Value) {
        if value.get("type").and_then(Value::as_str) == Some(CLEAR_NEIGHBORS_ACK) {
            let Some(stick) = value.get("stick_id").and_then(Value::as_str) else {
                debug!("Clear-neighbors ack without stick_id");
                return;
            };
            let status = value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or(STATUS_SUCCESS);
            self.store.set_neighbor_clear(stick, status);
            self.signals.raise_response();
            return;
        }

        if let Some(sticks) = parse_stick_list(&value) {
            debug!("Stick list with {} entries", sticks.len());
            self.store.set_sticks(sticks);
            self.signals.raise_response();
            return;
        }

        let Ok(reply) = serde_json::from_value::<DataReply>(value) else {
            debug!("Unrecognized bridge reply");
            return;
        };
        match reply.command() {
            Some((name, payload)) if name == RESP_GET_NEIGHBORS => {
                if let Some(stick) = &reply.stick_id {
                    self.store.set_neighbors(stick, parse_neighbors(&payload));
                }
                self.store.upsert_response(None, &name, payload);
                self.signals.raise_response();
            }
            _ => debug!("Unrecognized bridge reply"),
        }
    }

    fn on_result(&self, topic: &str, value: Value) {
        let report: ResultReport = match serde_json::from_value(value) {
            Ok(report) => report,
            Err(e) => {
                debug!("Dropping result on {}: {}", topic, e);
                return;
            }
        };
        if let Some(status) = report.status {
            debug!("Result {} = {}", report.command, status);
            self.store.set_result(&report.command, &status);
            self.signals.raise_result();
        }
    }

    fn on_data_reply(
        &self,
        topic: &str,
        value: Value,
        gateway: Option<&str>,
        topic_device: Option<&str>,
    ) {
        let reply: DataReply = match serde_json::from_value(value) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Dropping data reply on {}: {}", topic, e);
                return;
            }
        };
        let Some((name, mut payload)) = reply.command() else {
            debug!("Data reply on {} without command name", topic);
            return;
        };

        if name == RESP_GET_INFO || name == BEACON_RAW_DATA {
            annotate_version(&mut payload, &self.layout);
        }
        if name == BEACON_RAW_DATA {
            annotate_beacon(&mut payload);
        }
        if name == RESP_GET_NEIGHBORS {
            if let Some(gateway) = gateway.or(reply.stick_id.as_deref()) {
                self.store.set_neighbors(gateway, parse_neighbors(&payload));
            }
        }

        let target = reply
            .source()
            .as_deref()
            .or(topic_device)
            .map(DeviceId::parse_lossy);
        trace!("{} from {:?}", name, target);
        self.store.upsert_response(target, &name, payload);

        if name.starts_with("RESP_") {
            self.signals.raise_response();
        }
    }

    fn on_sample(&self, topic: &str, value: Value, topic_device: &str) {
        let Value::Object(fields) = value else {
            debug!("Dropping non-object ADC sample on {}", topic);
            return;
        };
        let device = fields
            .get("mlpe_id")
            .and_then(Value::as_str)
            .unwrap_or(topic_device);
        let device = DeviceId::parse_lossy(device);
        self.store
            .append_sample(device, AdcSample::from_payload(device, fields));
    }

    fn on_feature_status(&self, topic: &str, value: Value) {
        let report: FeatureStatusReport = match serde_json::from_value(value) {
            Ok(report) => report,
            Err(e) => {
                debug!("Dropping feature status on {}: {}", topic, e);
                return;
            }
        };
        if let Some(status) = report.status {
            debug!("Feature {} = {}", report.feature, status);
            self.store.set_result(&report.feature, &status);
            self.signals.raise_result();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, Arc<ResponseStore>) {
        let store = Arc::new(ResponseStore::new());
        let d = Dispatcher::new(
            store.clone(),
            Arc::new(Signals::new()),
            Arc::new(SubscriptionManager::new(Duration::from_secs(1))),
            VersionLayout::default(),
        );
        (d, store)
    }

    fn send(d: &Dispatcher, topic: &str, value: Value) {
        d.handle_message(topic, value.to_string().as_bytes());
    }

    #[test]
    fn info_reply_is_decoded_and_keyed() {
        let (d, store) = dispatcher();
        send(
            &d,
            "solar/device/S1/rx",
            json!({
                "mlpe_id": "9ffd2fca",
                "parsed_data": {"cmd_name": "RESP_GET_INFO", "payload": {"version": 0x12345678u32}}
            }),
        );
        let stored = store
            .response(DeviceId::new(0x9FFD_2FCA), "RESP_GET_INFO")
            .unwrap();
        assert_eq!(stored["version_unpacked"], json!("4.86.120"));
        assert_eq!(stored["vid"], json!(1));
        assert!(store.latest_response("RESP_GET_INFO").is_some());
    }

    #[test]
    fn mlpe_topic_names_the_target() {
        let (d, store) = dispatcher();
        send(
            &d,
            "solar/mlpe/0x00000010/rx",
            json!({"cmd_name": "RESP_GET_MPPT", "payload": {"mppt": true}}),
        );
        assert!(store.response(DeviceId::new(0x10), "RESP_GET_MPPT").is_some());
    }

    #[test]
    fn device_reply_without_source_is_unattributed() {
        let (d, store) = dispatcher();
        send(
            &d,
            "solar/device/S1/rx",
            json!({"parsed_data": {"cmd_name": "RESP_GET_NEIGHBORS", "payload": {"neighbors": [{"id": "0x1"}]}}}),
        );
        assert!(store.unattributed_response("RESP_GET_NEIGHBORS").is_some());
        assert_eq!(store.neighbors("S1").unwrap().len(), 1);
    }

    #[test]
    fn results_and_feature_status() {
        let (d, store) = dispatcher();
        send(&d, "solar/device/S1/result", json!({"command": "REQ_SHUTDOWN", "status": "SUCCESS"}));
        send(&d, "solar/feature/S1/status", json!({"feature": "DUMP_RAW_ADC", "status": "FAILED"}));
        assert_eq!(store.result("REQ_SHUTDOWN").as_deref(), Some("SUCCESS"));
        assert_eq!(store.result("DUMP_RAW_ADC").as_deref(), Some("FAILED"));
    }

    #[test]
    fn bridge_replies() {
        let (d, store) = dispatcher();
        send(&d, "solar/bridge/rx", json!({"type": "STICK_LIST", "sticks": [{"uid": "S1"}]}));
        assert_eq!(store.sticks().unwrap()[0].uid, "S1");

        send(&d, "solar/bridge/rx", json!({"type": "CLEAR_NEIGHBORS_ACK", "stick_id": "S1"}));
        assert_eq!(store.neighbor_clear("S1").as_deref(), Some("SUCCESS"));
    }

    #[test]
    fn samples_buffer_without_signal() {
        let (d, store) = dispatcher();
        send(&d, "solar/mlpe/0x00000010/adc", json!({"raw_0": 1, "raw_1": 2}));
        send(&d, "solar/mlpe/0x00000010/adc", json!({"mlpe_id": "0x20", "vout": 3}));
        assert_eq!(store.sample_count(DeviceId::new(0x10)), 1);
        assert_eq!(store.sample_count(DeviceId::new(0x20)), 1);
    }

    #[test]
    fn malformed_payloads_are_absorbed() {
        let (d, store) = dispatcher();
        d.handle_message("solar/device/S1/rx", b"{not json");
        d.handle_message("solar/device/S1/result", b"[1,2,3]");
        d.handle_message("solar/mlpe/0x10/adc", b"\"text\"");
        d.handle_message("solar/bridge/rx", b"{\"type\":\"UNKNOWN\"}");
        d.handle_message("some/other/topic", b"{}");
        assert!(store.latest_response("RESP_GET_INFO").is_none());
        assert_eq!(store.sample_count(DeviceId::new(0x10)), 0);
        assert!(store.sticks().is_none());
    }
}
