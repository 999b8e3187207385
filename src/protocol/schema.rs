//! Normalized payload schemas
//!
//! Field names drift between bridge revisions (`tx_pwr` / `txPwr`,
//! `asp_interval` / `aspInterval`, ...). Every accepted spelling is declared
//! once here as a serde alias; code past this module only sees one name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::envelope::DONT_CHANGE;
use crate::device_id::parse_upper_id;

// ---------------------------------------------------------------------------
// Inbound envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct L3Header {
    #[serde(default)]
    pub src: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedData {
    #[serde(default, alias = "cmdName")]
    pub cmd_name: Option<String>,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// Data reply on a `.../rx` topic, nested or flat.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataReply {
    #[serde(default, alias = "mlpeId")]
    pub mlpe_id: Option<Value>,
    #[serde(default, alias = "l3Header")]
    pub l3_header: Option<L3Header>,
    #[serde(default, alias = "parsedData")]
    pub parsed_data: Option<ParsedData>,
    #[serde(default, alias = "cmdName")]
    pub cmd_name: Option<String>,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, alias = "stickId")]
    pub stick_id: Option<String>,
}

impl DataReply {
    /// Command name and payload, preferring the nested decoded-protocol form.
    pub fn command(&self) -> Option<(String, Map<String, Value>)> {
        if let Some(parsed) = &self.parsed_data {
            if let Some(name) = &parsed.cmd_name {
                return Some((name.clone(), parsed.payload.clone().unwrap_or_default()));
            }
        }
        self.cmd_name
            .as_ref()
            .map(|name| (name.clone(), self.payload.clone().unwrap_or_default()))
    }

    /// Source device as the gateway reported it: `mlpe_id`, then `l3_header.src`.
    pub fn source(&self) -> Option<String> {
        let from_value = |v: &Value| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => n.as_u64().map(|raw| format!("0x{raw:08X}")),
            _ => None,
        };
        self.mlpe_id.as_ref().and_then(from_value).or_else(|| {
            self.l3_header
                .as_ref()
                .and_then(|h| h.src.as_ref())
                .and_then(from_value)
        })
    }
}

/// Coarse acknowledgment on `solar/device/<gateway>/result`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultReport {
    #[serde(alias = "cmd", alias = "cmd_name")]
    pub command: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Progress of a gateway feature on `solar/feature/<gateway>/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureStatusReport {
    pub feature: String,
    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Gateways and neighbors
// ---------------------------------------------------------------------------

/// A gateway ("stick") attached to the bridge host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stick {
    #[serde(alias = "id", alias = "stick_id", alias = "stickId")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    #[serde(alias = "mlpe_id", alias = "mlpeId")]
    pub id: String,
    #[serde(default = "weakest_rssi")]
    pub rssi: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn weakest_rssi() -> i32 {
    -100
}

impl Neighbor {
    /// Vendor as the bridge names it ("Conalog"), or the numeric id as text.
    pub fn vendor_name(&self) -> Option<String> {
        self.vid.as_ref().map(value_as_name)
    }

    pub fn product_name(&self) -> Option<String> {
        self.pid.as_ref().map(value_as_name)
    }
}

fn value_as_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes a gateway list in any of the shapes the bridge has used:
/// a bare array, `{"sticks": [...]}` or `{"type": "STICK_LIST", "sticks": [...]}`.
/// Entries that do not decode are dropped.
pub fn parse_stick_list(value: &Value) -> Option<Vec<Stick>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("sticks") {
            Some(Value::Array(items)) => items,
            Some(_) => return Some(Vec::new()),
            None if obj.get("type").and_then(Value::as_str) == Some("STICK_LIST") => {
                return Some(Vec::new())
            }
            None => return None,
        },
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
    )
}

/// Decodes `payload.neighbors`, dropping entries that do not decode.
pub fn parse_neighbors(payload: &Map<String, Value>) -> Vec<Neighbor> {
    match payload.get("neighbors") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Device info
// ---------------------------------------------------------------------------

/// `RESP_GET_INFO` after decoding; fields the device did not send stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub version_unpacked: Option<String>,
    pub vid: Option<u32>,
    pub pid: Option<u32>,
    pub upper_id: Option<u16>,
    pub uptime: Option<u64>,
    pub payload: Map<String, Value>,
}

impl DeviceInfo {
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        let as_u32 = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
        };
        Self {
            version_unpacked: payload
                .get("version_unpacked")
                .and_then(Value::as_str)
                .map(str::to_string),
            vid: as_u32("vid"),
            pid: as_u32("pid"),
            upper_id: payload
                .get("upper_id")
                .or_else(|| payload.get("upperId"))
                .and_then(parse_upper_id),
            uptime: payload.get("uptime").and_then(Value::as_u64),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Mesh configuration
// ---------------------------------------------------------------------------

/// Radio layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, alias = "txPwr", skip_serializing_if = "Option::is_none")]
    pub tx_pwr: Option<i32>,
}

/// Network layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    #[serde(default, alias = "aspInterval", skip_serializing_if = "Option::is_none")]
    pub asp_interval: Option<u32>,
}

/// Mesh layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshParams {
    #[serde(default, alias = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    #[serde(default, alias = "relayEnabled", alias = "relay_enabled", skip_serializing_if = "Option::is_none")]
    pub relay: Option<bool>,
}

/// Mesh parameter groups. Used both for the request and for the echoed
/// configuration in the reply; `None` means "not requested" or "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub l1: RadioParams,
    #[serde(default)]
    pub l2: NetworkParams,
    #[serde(default)]
    pub l3: MeshParams,
}

impl MeshConfig {
    pub fn with_channel(mut self, channel: u32) -> Self {
        self.l1.channel = Some(channel);
        self
    }

    pub fn with_tx_power(mut self, dbm: i32) -> Self {
        self.l1.tx_pwr = Some(dbm);
        self
    }

    pub fn with_asp_interval(mut self, millis: u32) -> Self {
        self.l2.asp_interval = Some(millis);
        self
    }

    pub fn with_group(mut self, group_id: u32) -> Self {
        self.l3.group_id = Some(group_id);
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.l3.relay = Some(relay);
        self
    }

    /// Reads the echoed configuration out of a reply payload.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(payload.clone())).unwrap_or_default()
    }

    pub fn to_args(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MPPT
// ---------------------------------------------------------------------------

/// `RESP_GET_MPPT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpptStatus {
    #[serde(default, alias = "enabled", alias = "mppt_enable")]
    pub mppt: bool,
    #[serde(default, alias = "minLimit")]
    pub min_limit: Option<u32>,
    #[serde(default, alias = "maxLimit")]
    pub max_limit: Option<u32>,
    #[serde(default, alias = "maxDuty")]
    pub max_duty: Option<u32>,
    #[serde(default, alias = "bypassCondition")]
    pub bypass_condition: bool,
}

impl MpptStatus {
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(payload.clone())).ok()
    }
}

/// Duty limits to write. A `None` limit is sent as [`DONT_CHANGE`], which
/// the firmware keeps distinct from a real zero. `bypass_condition` is only
/// sent when set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpptLimits {
    pub max_duty: Option<u32>,
    pub min_limit: Option<u32>,
    pub max_limit: Option<u32>,
    pub bypass_condition: Option<bool>,
}

impl MpptLimits {
    /// Pins the duty cycle by setting both limits to the same value. The
    /// bypass condition is forced on so the tracker cannot leave the pin.
    pub fn fixed_duty(duty: u32) -> Self {
        Self {
            max_duty: None,
            min_limit: Some(duty),
            max_limit: Some(duty),
            bypass_condition: Some(true),
        }
    }

    /// Limits that put a device back the way [`MpptStatus`] found it.
    pub fn restore(status: &MpptStatus) -> Self {
        Self {
            max_duty: status.max_duty,
            min_limit: status.min_limit,
            max_limit: status.max_limit,
            bypass_condition: Some(status.bypass_condition),
        }
    }

    pub fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("max_duty".into(), self.max_duty.unwrap_or(DONT_CHANGE).into());
        args.insert("min_limit".into(), self.min_limit.unwrap_or(DONT_CHANGE).into());
        args.insert("max_limit".into(), self.max_limit.unwrap_or(DONT_CHANGE).into());
        if let Some(bypass) = self.bypass_condition {
            args.insert("bypass_condition".into(), bypass.into());
        }
        args
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Rapid-shutdown switches for `REQ_SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    pub rsd1: bool,
    pub rsd2: bool,
}

impl Default for ShutdownRequest {
    fn default() -> Self {
        Self {
            rsd1: true,
            rsd2: true,
        }
    }
}

impl ShutdownRequest {
    pub fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("route".into(), 2.into());
        args.insert("rsd1".into(), self.rsd1.into());
        args.insert("rsd2".into(), self.rsd2.into());
        // group field is unused by the firmware but must be present
        args.insert("group_num1".into(), DONT_CHANGE.into());
        args
    }
}
