//! Decoders for packed numeric fields
//!
//! Two word formats come back from the gateway packed into plain integers:
//! the firmware version word and the dual-channel ADC words of a beacon.
//! Both decoders are pure; the `annotate_*` helpers apply them to a decoded
//! JSON payload in place and leave the payload alone when a field is missing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One bit field inside a 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    pub shift: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(shift: u8, width: u8) -> Self {
        Self { shift, width }
    }

    pub fn extract(self, word: u32) -> u32 {
        if self.shift >= 32 || self.width == 0 {
            return 0;
        }
        let mask = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        (word >> self.shift) & mask
    }
}

/// Known revisions of the version-word layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRevision {
    /// vendor 28-31, product 20-23, major 16-19, minor 8-15, patch 0-7.
    NibblePid,
    /// vendor 28-31, product 20-27, major 16-19, minor 8-15, patch 0-7.
    WidePid,
}

/// Bit positions of every sub-field in the version word.
///
/// The split is a contract with the gateway firmware and has moved between
/// protocol revisions, so it is data rather than code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LayoutRepr")]
pub struct VersionLayout {
    pub vendor: BitField,
    pub product: BitField,
    pub major: BitField,
    pub minor: BitField,
    pub patch: BitField,
}

impl VersionLayout {
    pub const NIBBLE_PID: VersionLayout = VersionLayout {
        vendor: BitField::new(28, 4),
        product: BitField::new(20, 4),
        major: BitField::new(16, 4),
        minor: BitField::new(8, 8),
        patch: BitField::new(0, 8),
    };

    pub const WIDE_PID: VersionLayout = VersionLayout {
        vendor: BitField::new(28, 4),
        product: BitField::new(20, 8),
        major: BitField::new(16, 4),
        minor: BitField::new(8, 8),
        patch: BitField::new(0, 8),
    };

    pub fn for_revision(revision: VersionRevision) -> Self {
        match revision {
            VersionRevision::NibblePid => Self::NIBBLE_PID,
            VersionRevision::WidePid => Self::WIDE_PID,
        }
    }
}

impl Default for VersionLayout {
    fn default() -> Self {
        Self::NIBBLE_PID
    }
}

/// Config files may name a revision or spell out the fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutRepr {
    Named(VersionRevision),
    Fields {
        vendor: BitField,
        product: BitField,
        major: BitField,
        minor: BitField,
        patch: BitField,
    },
}

impl From<LayoutRepr> for VersionLayout {
    fn from(repr: LayoutRepr) -> Self {
        match repr {
            LayoutRepr::Named(revision) => VersionLayout::for_revision(revision),
            LayoutRepr::Fields {
                vendor,
                product,
                major,
                minor,
                patch,
            } => VersionLayout {
                vendor,
                product,
                major,
                minor,
                patch,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub vendor_id: u32,
    pub product_id: u32,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// `major.minor.patch`
    pub fn formatted(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub fn decode_version(word: u32, layout: &VersionLayout) -> VersionInfo {
    VersionInfo {
        vendor_id: layout.vendor.extract(word),
        product_id: layout.product.extract(word),
        major: layout.major.extract(word),
        minor: layout.minor.extract(word),
        patch: layout.patch.extract(word),
    }
}

/// Four ADC channels carried by the two raw beacon words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeaconChannels {
    pub vin1: u16,
    pub vin2: u16,
    pub iout: u16,
    pub vout: u16,
}

/// Splits one raw word into (high, low) channels.
///
/// Words above 16 bits carry two packed channels. Anything that fits in 16
/// bits is a single channel the gateway already resolved; its pair is zero.
pub fn unpack_word(word: u32) -> (u16, u16) {
    if word > 0xFFFF {
        ((word >> 16) as u16, (word & 0xFFFF) as u16)
    } else {
        (word as u16, 0)
    }
}

pub fn decode_beacon(raw_0: u32, raw_1: u32) -> BeaconChannels {
    let (vin1, vin2) = unpack_word(raw_0);
    let (iout, vout) = unpack_word(raw_1);
    BeaconChannels {
        vin1,
        vin2,
        iout,
        vout,
    }
}

/// Adds `vid`, `pid` and `version_unpacked` next to a non-zero `version`.
pub fn annotate_version(payload: &mut Map<String, Value>, layout: &VersionLayout) {
    let word = match payload.get("version").and_then(json_u32) {
        Some(word) if word != 0 => word,
        _ => return,
    };
    let info = decode_version(word, layout);
    payload.insert("vid".into(), info.vendor_id.into());
    payload.insert("pid".into(), info.product_id.into());
    payload.insert("version_unpacked".into(), info.formatted().into());
}

/// Adds `vin1`, `vin2`, `iout` and `vout` from `raw_0` / `raw_1`.
///
/// A missing word leaves its channels out; channels the payload already
/// carries are never overwritten.
pub fn annotate_beacon(payload: &mut Map<String, Value>) {
    let raw_0 = payload.get("raw_0").and_then(json_u32);
    let raw_1 = payload.get("raw_1").and_then(json_u32);

    let mut put = |key: &str, value: u16| {
        if !payload.contains_key(key) {
            payload.insert(key.to_string(), value.into());
        }
    };
    if let Some(word) = raw_0 {
        let (vin1, vin2) = unpack_word(word);
        put("vin1", vin1);
        put("vin2", vin2);
    }
    if let Some(word) = raw_1 {
        let (iout, vout) = unpack_word(word);
        put("iout", iout);
        put("vout", vout);
    }
}

/// Reads a JSON number or numeric string as `u32`.
pub(crate) fn json_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_word_nibble_layout() {
        let info = decode_version(0x1234_5678, &VersionLayout::NIBBLE_PID);
        assert_eq!(info.vendor_id, 0x1);
        assert_eq!(info.product_id, 0x3);
        assert_eq!(info.major, 0x4);
        assert_eq!(info.minor, 0x56);
        assert_eq!(info.patch, 0x78);
        assert_eq!(info.formatted(), "4.86.120");
        // same word, same answer
        assert_eq!(info, decode_version(0x1234_5678, &VersionLayout::NIBBLE_PID));
    }

    #[test]
    fn version_word_wide_pid_layout() {
        let info = decode_version(0x1234_5678, &VersionLayout::WIDE_PID);
        assert_eq!(info.vendor_id, 0x1);
        assert_eq!(info.product_id, 0x23);
        assert_eq!(info.formatted(), "4.86.120");
    }

    #[test]
    fn bit_field_handles_degenerate_widths() {
        assert_eq!(BitField::new(0, 32).extract(0xDEAD_BEEF), 0xDEAD_BEEF);
        assert_eq!(BitField::new(32, 4).extract(0xFFFF_FFFF), 0);
        assert_eq!(BitField::new(4, 0).extract(0xFFFF_FFFF), 0);
    }

    #[test]
    fn beacon_packed_words() {
        let ch = decode_beacon(0x0001_0002, 0x0003_0004);
        assert_eq!((ch.vin1, ch.vin2, ch.iout, ch.vout), (1, 2, 3, 4));
    }

    #[test]
    fn beacon_single_channel_words() {
        let ch = decode_beacon(5, 0xFFFF);
        assert_eq!((ch.vin1, ch.vin2), (5, 0));
        assert_eq!((ch.iout, ch.vout), (0xFFFF, 0));
    }

    #[test]
    fn annotate_version_skips_zero_and_missing() {
        let mut payload = json!({"version": 0, "uptime": 3}).as_object().cloned().unwrap();
        annotate_version(&mut payload, &VersionLayout::default());
        assert!(!payload.contains_key("version_unpacked"));

        let mut payload = json!({"uptime": 3}).as_object().cloned().unwrap();
        annotate_version(&mut payload, &VersionLayout::default());
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn annotate_version_adds_fields() {
        let mut payload = json!({"version": 0x1234_5678u32}).as_object().cloned().unwrap();
        annotate_version(&mut payload, &VersionLayout::default());
        assert_eq!(payload["vid"], json!(1));
        assert_eq!(payload["pid"], json!(3));
        assert_eq!(payload["version_unpacked"], json!("4.86.120"));
    }

    #[test]
    fn annotate_beacon_partial_and_existing() {
        let mut payload = json!({"raw_0": 0x0001_0002, "vout": 99}).as_object().cloned().unwrap();
        annotate_beacon(&mut payload);
        assert_eq!(payload["vin1"], json!(1));
        assert_eq!(payload["vin2"], json!(2));
        assert_eq!(payload["vout"], json!(99));
        assert!(!payload.contains_key("iout"));
    }

    #[test]
    fn layout_from_name_or_table() {
        let layout: VersionLayout = serde_json::from_value(json!("wide_pid")).unwrap();
        assert_eq!(layout, VersionLayout::WIDE_PID);

        let table = serde_json::to_value(VersionLayout::NIBBLE_PID).unwrap();
        let layout: VersionLayout = serde_json::from_value(table).unwrap();
        assert_eq!(layout, VersionLayout::NIBBLE_PID);
    }
}
