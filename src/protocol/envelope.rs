//! Outbound message shapes
//!
//! Addressed device commands travel as a [`CommandEnvelope`] on
//! `solar/device/<gateway>/tx`; gateway management goes out as a
//! [`BridgeRequest`] on `solar/bridge/tx`; higher-level gateway features as
//! a [`FeatureCommand`] on `solar/feature/<gateway>/tx`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device_id::DeviceId;

/// Substring that marks a command as expecting a data reply.
pub const QUERY_MARKER: &str = "GET";

pub const REQ_GET_INFO: &str = "REQ_GET_INFO";
pub const REQ_GET_NEIGHBORS: &str = "REQ_GET_NEIGHBORS";
pub const REQ_SHUTDOWN: &str = "REQ_SHUTDOWN";
pub const REQ_SET_MESH_CONFIG: &str = "REQ_SET_MESH_CONFIG";
pub const REQ_GET_MPPT: &str = "REQ_GET_MPPT";
pub const REQ_SET_MPPT: &str = "REQ_SET_MPPT";
pub const REQ_SET_MPPT_ENABLE: &str = "REQ_SET_MPPT_ENABLE";

pub const RESP_GET_INFO: &str = "RESP_GET_INFO";
pub const RESP_GET_NEIGHBORS: &str = "RESP_GET_NEIGHBORS";
pub const BEACON_RAW_DATA: &str = "BEACON_RAW_DATA";

pub const FEATURE_DUMP_RAW_ADC: &str = "DUMP_RAW_ADC";

/// Sentinel the firmware reads as "leave this numeric field unchanged".
pub const DONT_CHANGE: u32 = 0xFFFF_FFFF;

/// Coarse status token reported on result and feature-status topics.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Name of the data reply to a request: `REQ_X` answers as `RESP_X`.
pub fn response_name(command: &str) -> String {
    match command.strip_prefix("REQ_") {
        Some(rest) => format!("RESP_{rest}"),
        None => command.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingClass {
    Broadcast,
    Addressed,
}

impl RoutingClass {
    pub fn for_target(target: DeviceId) -> Self {
        if target.is_broadcast() {
            RoutingClass::Broadcast
        } else {
            RoutingClass::Addressed
        }
    }

    /// Numeric `route` argument understood by the gateway firmware.
    pub fn route_code(self) -> u8 {
        match self {
            RoutingClass::Broadcast => 1,
            RoutingClass::Addressed => 2,
        }
    }
}

/// Whether a command is only done once its data reply has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Waits for a data payload.
    Query,
    /// A bare success acknowledgment is enough.
    Action,
}

impl CommandClass {
    pub fn from_name(command: &str) -> Self {
        if command.contains(QUERY_MARKER) {
            CommandClass::Query
        } else {
            CommandClass::Action
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub target_id: DeviceId,
    pub routing_type: RoutingClass,
    pub args: Map<String, Value>,
}

impl CommandEnvelope {
    /// Builds the envelope, mirroring `target_id` and `route` into `args`
    /// where the gateway firmware reads them. A caller-supplied `route`
    /// is kept.
    pub fn new(command: impl Into<String>, target: DeviceId, mut args: Map<String, Value>) -> Self {
        let routing_type = RoutingClass::for_target(target);
        args.insert("target_id".into(), Value::String(target.to_string()));
        args.entry("route")
            .or_insert_with(|| Value::from(routing_type.route_code()));
        Self {
            command: command.into(),
            target_id: target,
            routing_type,
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    ListSticks,
    ClearNeighbors { stick_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCommand {
    pub command: String,
    pub args: Map<String, Value>,
}

impl FeatureCommand {
    pub fn dump_raw_adc(target: DeviceId, duration_secs: f64) -> Self {
        let mut args = Map::new();
        args.insert("target_id".into(), Value::String(target.to_string()));
        args.insert("duration".into(), Value::from(duration_secs));
        Self {
            command: FEATURE_DUMP_RAW_ADC.to_string(),
            args,
        }
    }
}
