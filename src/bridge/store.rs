//! Response store
//!
//! Process-wide cache written by the dispatcher and read by the correlator.
//! Every operation takes the lock for a handful of map operations and never
//! waits on anything else, so a plain `std::sync::RwLock` is enough.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use super::adc::AdcSample;
use crate::device_id::DeviceId;
use crate::protocol::schema::{Neighbor, Stick};

pub type Payload = Map<String, Value>;

/// `target` is `None` for replies whose source device could not be identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResponseKey {
    target: Option<DeviceId>,
    command: String,
}

impl ResponseKey {
    fn new(target: Option<DeviceId>, command: &str) -> Self {
        Self {
            target,
            command: command.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    responses: HashMap<ResponseKey, Payload>,
    latest: HashMap<String, Payload>,
    results: HashMap<String, String>,
    sticks: Option<Vec<Stick>>,
    neighbors: HashMap<String, Vec<Neighbor>>,
    neighbor_clears: HashMap<String, String>,
    samples: HashMap<DeviceId, Vec<AdcSample>>,
}

#[derive(Debug, Default)]
pub struct ResponseStore {
    inner: RwLock<StoreInner>,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain maps behind, still usable.
    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a reply under `(target, command)` and in the single-slot
    /// `latest` map keyed by bare command name.
    pub fn upsert_response(&self, target: Option<DeviceId>, command: &str, payload: Payload) {
        let mut inner = self.write();
        inner
            .responses
            .insert(ResponseKey::new(target, command), payload.clone());
        inner.latest.insert(command.to_string(), payload);
    }

    pub fn response(&self, target: DeviceId, command: &str) -> Option<Payload> {
        self.read()
            .responses
            .get(&ResponseKey::new(Some(target), command))
            .cloned()
    }

    /// Reply with this name whose source device was not identified.
    pub fn unattributed_response(&self, command: &str) -> Option<Payload> {
        self.read()
            .responses
            .get(&ResponseKey::new(None, command))
            .cloned()
    }

    /// Last reply with this name from any device.
    pub fn latest_response(&self, command: &str) -> Option<Payload> {
        self.read().latest.get(command).cloned()
    }

    /// Drops the keyed, unattributed and latest slots for this command.
    pub fn clear_response(&self, target: DeviceId, command: &str) {
        let mut inner = self.write();
        inner.responses.remove(&ResponseKey::new(Some(target), command));
        inner.responses.remove(&ResponseKey::new(None, command));
        inner.latest.remove(command);
    }

    pub fn set_result(&self, command: &str, status: &str) {
        self.write()
            .results
            .insert(command.to_string(), status.to_string());
    }

    pub fn result(&self, command: &str) -> Option<String> {
        self.read().results.get(command).cloned()
    }

    pub fn clear_result(&self, command: &str) {
        self.write().results.remove(command);
    }

    pub fn set_sticks(&self, sticks: Vec<Stick>) {
        self.write().sticks = Some(sticks);
    }

    pub fn sticks(&self) -> Option<Vec<Stick>> {
        self.read().sticks.clone()
    }

    pub fn clear_sticks(&self) {
        self.write().sticks = None;
    }

    pub fn set_neighbors(&self, gateway: &str, neighbors: Vec<Neighbor>) {
        self.write()
            .neighbors
            .insert(gateway.to_string(), neighbors);
    }

    pub fn neighbors(&self, gateway: &str) -> Option<Vec<Neighbor>> {
        self.read().neighbors.get(gateway).cloned()
    }

    pub fn set_neighbor_clear(&self, gateway: &str, status: &str) {
        self.write()
            .neighbor_clears
            .insert(gateway.to_string(), status.to_string());
    }

    pub fn neighbor_clear(&self, gateway: &str) -> Option<String> {
        self.read().neighbor_clears.get(gateway).cloned()
    }

    pub fn clear_neighbor_state(&self, gateway: &str) {
        let mut inner = self.write();
        inner.neighbor_clears.remove(gateway);
        inner.neighbors.remove(gateway);
    }

    pub fn append_sample(&self, device: DeviceId, sample: AdcSample) {
        self.write().samples.entry(device).or_default().push(sample);
    }

    pub fn samples(&self, device: DeviceId) -> Vec<AdcSample> {
        self.read()
            .samples
            .get(&device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn sample_count(&self, device: DeviceId) -> usize {
        self.read().samples.get(&device).map_or(0, Vec::len)
    }

    /// Starts a new collection window: the buffer exists and is empty.
    pub fn clear_samples(&self, device: DeviceId) {
        self.write().samples.insert(device, Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn upsert_writes_keyed_and_latest() {
        let store = ResponseStore::new();
        let dev = DeviceId::new(0x10);
        store.upsert_response(Some(dev), "RESP_GET_INFO", payload(json!({"uptime": 1})));
        assert_eq!(store.response(dev, "RESP_GET_INFO").unwrap()["uptime"], json!(1));
        assert_eq!(store.latest_response("RESP_GET_INFO").unwrap()["uptime"], json!(1));
        assert!(store.response(DeviceId::new(0x11), "RESP_GET_INFO").is_none());
    }

    #[test]
    fn unknown_source_is_unattributed() {
        let store = ResponseStore::new();
        store.upsert_response(None, "RESP_GET_NEIGHBORS", payload(json!({})));
        assert!(store.latest_response("RESP_GET_NEIGHBORS").is_some());
        assert!(store.unattributed_response("RESP_GET_NEIGHBORS").is_some());
        assert!(store.response(DeviceId::ZERO, "RESP_GET_NEIGHBORS").is_none());
    }

    #[test]
    fn attributed_reply_is_not_unattributed() {
        let store = ResponseStore::new();
        store.upsert_response(Some(DeviceId::new(0x20)), "RESP_GET_INFO", payload(json!({})));
        assert!(store.unattributed_response("RESP_GET_INFO").is_none());
    }

    #[test]
    fn newest_response_wins() {
        let store = ResponseStore::new();
        let dev = DeviceId::new(0x10);
        store.upsert_response(Some(dev), "RESP_GET_MPPT", payload(json!({"mppt": false})));
        store.upsert_response(Some(dev), "RESP_GET_MPPT", payload(json!({"mppt": true})));
        assert_eq!(store.response(dev, "RESP_GET_MPPT").unwrap()["mppt"], json!(true));
    }

    #[test]
    fn clear_removes_every_slot() {
        let store = ResponseStore::new();
        let dev = DeviceId::new(0x10);
        store.upsert_response(Some(dev), "RESP_GET_INFO", payload(json!({})));
        store.upsert_response(None, "RESP_GET_INFO", payload(json!({})));
        store.clear_response(dev, "RESP_GET_INFO");
        assert!(store.response(dev, "RESP_GET_INFO").is_none());
        assert!(store.unattributed_response("RESP_GET_INFO").is_none());
        assert!(store.latest_response("RESP_GET_INFO").is_none());
    }

    #[test]
    fn results_are_per_command() {
        let store = ResponseStore::new();
        store.set_result("REQ_SHUTDOWN", "SUCCESS");
        store.set_result("REQ_SET_MPPT", "FAILED");
        assert_eq!(store.result("REQ_SHUTDOWN").as_deref(), Some("SUCCESS"));
        store.clear_result("REQ_SHUTDOWN");
        assert!(store.result("REQ_SHUTDOWN").is_none());
        assert_eq!(store.result("REQ_SET_MPPT").as_deref(), Some("FAILED"));
    }

    #[test]
    fn sample_buffer_grows_until_cleared() {
        let store = ResponseStore::new();
        let dev = DeviceId::new(0x10);
        assert_eq!(store.sample_count(dev), 0);
        store.append_sample(dev, AdcSample::from_payload(dev, payload(json!({"vout": 1}))));
        store.append_sample(dev, AdcSample::from_payload(dev, payload(json!({"vout": 2}))));
        assert_eq!(store.sample_count(dev), 2);
        store.clear_samples(dev);
        assert!(store.samples(dev).is_empty());
    }
}
