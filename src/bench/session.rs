//! Per-sequence device context
//!
//! A [`TestSession`] is created when a test sequence starts, passed to each
//! step, and reset when the sequence ends. It replaces any process-wide
//! "current device" state: two sessions never share a target.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::BridgeClient;
use crate::device_id::{DeviceId, FullDeviceId};
use crate::protocol::schema::DeviceInfo;

/// The device under test, filled in as steps learn about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetDevice {
    pub device_id: Option<DeviceId>,
    pub upper_id: Option<u16>,
    pub info: Option<DeviceInfo>,
    /// Average output voltage before the relay step, for later ratio checks
    pub baseline_vout: Option<f64>,
}

impl TargetDevice {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    /// 12-digit address; needs both the short id and the upper id.
    pub fn full_id(&self) -> Option<FullDeviceId> {
        Some(FullDeviceId::new(self.upper_id?, self.device_id?))
    }

    pub fn apply_info(&mut self, info: DeviceInfo) {
        if info.upper_id.is_some() {
            self.upper_id = info.upper_id;
        }
        self.info = Some(info);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestSession {
    gateway: Option<String>,
    target: TargetDevice,
}

impl TestSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(gateway: impl Into<String>) -> Self {
        Self {
            gateway: Some(gateway.into()),
            target: TargetDevice::default(),
        }
    }

    pub fn gateway(&self) -> Option<&str> {
        self.gateway.as_deref()
    }

    pub fn set_gateway(&mut self, gateway: impl Into<String>) {
        self.gateway = Some(gateway.into());
    }

    pub fn target(&self) -> &TargetDevice {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut TargetDevice {
        &mut self.target
    }

    /// Starts over with a new device; anything learned about the previous one is dropped.
    pub fn select_target(&mut self, id: &str) -> DeviceId {
        let device_id = DeviceId::parse_lossy(id);
        debug!("Session target set to {}", device_id);
        self.target = TargetDevice::new(device_id);
        device_id
    }

    /// Picks the first gateway the bridge reports, if none is selected yet.
    pub async fn discover_gateway(&mut self, client: &BridgeClient) -> Option<&str> {
        if self.gateway.is_none() {
            let sticks = client.list_sticks().await;
            match sticks.into_iter().next() {
                Some(stick) => {
                    info!("Using gateway {}", stick.uid);
                    self.gateway = Some(stick.uid);
                }
                None => warn!("No gateway attached to the bridge"),
            }
        }
        self.gateway.as_deref()
    }

    /// Queries `REQ_GET_INFO` for the current target and records the result.
    pub async fn identify(&mut self, client: &BridgeClient) -> Option<&DeviceInfo> {
        let (Some(gateway), Some(device_id)) = (self.gateway.as_deref(), self.target.device_id)
        else {
            warn!("Cannot identify device: gateway or target not selected");
            return None;
        };
        let info = client
            .get_device_info(&device_id.to_string(), gateway)
            .await?;
        self.target.apply_info(info);
        if let Some(full) = self.target.full_id() {
            info!("Identified {} as {}", device_id, full);
        }
        self.target.info.as_ref()
    }

    /// Ends the sequence: the gateway choice survives, the target does not.
    pub fn reset(&mut self) {
        self.target.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn info(v: Value) -> DeviceInfo {
        DeviceInfo::from_payload(v.as_object().cloned().unwrap_or_else(Map::new))
    }

    #[test]
    fn full_id_needs_both_halves() {
        let mut target = TargetDevice::new(DeviceId::new(0x9FFD_2FCA));
        assert_eq!(target.full_id(), None);
        target.apply_info(info(json!({"upper_id": "0x1234"})));
        assert_eq!(target.full_id().unwrap().to_string(), "0x12349FFD2FCA");
    }

    #[test]
    fn info_without_upper_id_keeps_known_one() {
        let mut target = TargetDevice::new(DeviceId::new(1));
        target.upper_id = Some(7);
        target.apply_info(info(json!({"uptime": 3})));
        assert_eq!(target.upper_id, Some(7));
        assert_eq!(target.info.as_ref().unwrap().uptime, Some(3));
    }

    #[test]
    fn selecting_a_target_forgets_the_previous_one() {
        let mut session = TestSession::with_gateway("S1");
        session.select_target("0xaa");
        session.target_mut().baseline_vout = Some(30.0);
        let id = session.select_target("bb");
        assert_eq!(id, DeviceId::new(0xBB));
        assert_eq!(session.target().baseline_vout, None);
        assert_eq!(session.gateway(), Some("S1"));
    }

    #[test]
    fn reset_clears_target_only() {
        let mut session = TestSession::with_gateway("S1");
        session.select_target("0x10");
        session.reset();
        assert_eq!(session.target(), &TargetDevice::default());
        assert_eq!(session.gateway(), Some("S1"));
    }
}
