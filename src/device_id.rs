//! Device identifier normalization
//!
//! The gateway, the bridge and the step runners all spell device ids
//! differently: `0x9ffd2fca`, `9FFD2FCA`, `0X9FFD2FCA`, or the 12-digit
//! FICR address `0x12349FFD2FCA`. Everything that keys on a device id
//! goes through [`normalize`] first so those spellings compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Short (4-byte) mesh address of an MLPE device.
///
/// Displays as `0x` followed by 8 upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Reserved id the gateway reads as "the stick itself / nobody in particular".
    pub const ZERO: DeviceId = DeviceId(0);
    /// Reserved id the gateway reads as "every device in range".
    pub const ALL: DeviceId = DeviceId(0xFFFF_FFFF);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Parses any accepted spelling, never failing.
    ///
    /// Only the low-order 4 bytes (last 8 hex digits) are kept. Empty input
    /// and input that is not hexadecimal both map to [`DeviceId::ZERO`].
    pub fn parse_lossy(input: &str) -> Self {
        let digits = strip_hex_prefix(input.trim());
        if digits.is_empty() || !digits.is_ascii() {
            return Self::ZERO;
        }
        let low = if digits.len() > 8 {
            &digits[digits.len() - 8..]
        } else {
            digits
        };
        u32::from_str_radix(low, 16).map(Self).unwrap_or(Self::ZERO)
    }

    /// True for the two reserved ids the gateway routes as broadcast.
    pub fn is_broadcast(self) -> bool {
        self == Self::ZERO || self == Self::ALL
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => DeviceId::parse_lossy(&s),
            serde_json::Value::Number(n) => DeviceId(n.as_u64().unwrap_or(0) as u32),
            _ => DeviceId::ZERO,
        })
    }
}

/// Canonical short form of a device id: `0x` + 8 upper-case hex digits.
///
/// Pure and total. `normalize(&normalize(x)) == normalize(x)` for every input.
pub fn normalize(input: &str) -> String {
    DeviceId::parse_lossy(input).to_string()
}

/// 12-hex-digit device address: the 2-byte upper id reported by
/// `RESP_GET_INFO` followed by the 4-byte mesh address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullDeviceId {
    pub upper: u16,
    pub lower: DeviceId,
}

impl FullDeviceId {
    pub fn new(upper: u16, lower: DeviceId) -> Self {
        Self { upper, lower }
    }
}

impl fmt::Display for FullDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:04X}{:08X}", self.upper, self.lower.raw())
    }
}

/// Reads the upper id the way the gateway sends it: a JSON number, a
/// decimal string or a `0x`-prefixed hex string.
pub fn parse_upper_id(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.starts_with("0x") || s.starts_with("0X") {
                u16::from_str_radix(&s[2..], 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn case_and_prefix_variants_normalize_equal() {
        let expected = "0x9FFD2FCA";
        for input in ["0x9ffd2fca", "9FFD2FCA", "0X9FFD2FCA", "9ffd2fca", " 0x9FFD2FCA "] {
            assert_eq!(normalize(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["", "0", "abc", "0x12349FFD2FCA", "ffffffff", "not-hex"] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn long_ids_keep_low_order_bytes() {
        assert_eq!(normalize("0x12349FFD2FCA"), "0x9FFD2FCA");
    }

    #[test]
    fn short_ids_are_zero_padded() {
        assert_eq!(normalize("0x1"), "0x00000001");
        assert_eq!(normalize("0"), "0x00000000");
    }

    #[test]
    fn empty_and_garbage_map_to_zero() {
        assert_eq!(normalize(""), "0x00000000");
        assert_eq!(normalize("0x"), "0x00000000");
        assert_eq!(normalize("zzzz"), "0x00000000");
    }

    #[test]
    fn reserved_ids_are_broadcast() {
        assert!(DeviceId::parse_lossy("0").is_broadcast());
        assert!(DeviceId::parse_lossy("0xffffffff").is_broadcast());
        assert!(!DeviceId::parse_lossy("0x9FFD2FCA").is_broadcast());
    }

    #[test]
    fn full_id_concatenates_upper_and_lower() {
        let full = FullDeviceId::new(0x1234, DeviceId::new(0x9FFD2FCA));
        assert_eq!(full.to_string(), "0x12349FFD2FCA");
    }

    #[test]
    fn upper_id_accepts_number_and_strings() {
        assert_eq!(parse_upper_id(&json!(4660)), Some(0x1234));
        assert_eq!(parse_upper_id(&json!("0x1234")), Some(0x1234));
        assert_eq!(parse_upper_id(&json!("4660")), Some(0x1234));
        assert_eq!(parse_upper_id(&json!(70000)), None);
        assert_eq!(parse_upper_id(&json!(null)), None);
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let id: DeviceId = serde_json::from_value(json!("0x9ffd2fca")).unwrap();
        assert_eq!(id, DeviceId::new(0x9FFD2FCA));
        let id: DeviceId = serde_json::from_value(json!(16)).unwrap();
        assert_eq!(id.to_string(), "0x00000010");
    }
}
