//! Checks applied to what the bridge returns
//!
//! None of these talk to the bridge; they take the client's results and
//! decide pass or fail.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::{Product, Vendor};
use crate::bridge::AdcSample;
use crate::protocol::schema::{MeshConfig, Neighbor};

/// Why a mesh configuration echo does not match the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeshFieldError {
    #[error("no configuration reported")]
    NoReply,

    #[error("{field} missing from reply")]
    Missing { field: String },

    #[error("{field}: expected {expected}, got {actual}")]
    Mismatch {
        field: String,
        expected: Value,
        actual: Value,
    },
}

/// Compares every field set in `requested` with the device's echo.
///
/// Fields left unset in the request are not checked. An empty result means
/// the configuration was verified.
pub fn verify_mesh_config(
    requested: &MeshConfig,
    reported: Option<&MeshConfig>,
) -> Vec<MeshFieldError> {
    let Some(reported) = reported else {
        return vec![MeshFieldError::NoReply];
    };
    let reported = reported.to_args();

    let mut errors = Vec::new();
    for (layer, fields) in requested.to_args() {
        let Value::Object(fields) = fields else {
            continue;
        };
        for (name, expected) in fields {
            let field = format!("{layer}.{name}");
            match reported.get(&layer).and_then(|l| l.get(&name)) {
                None => errors.push(MeshFieldError::Missing { field }),
                Some(actual) if *actual != expected => errors.push(MeshFieldError::Mismatch {
                    field,
                    expected,
                    actual: actual.clone(),
                }),
                Some(_) => {}
            }
        }
    }
    errors
}

/// Mean of `field` over the samples.
///
/// When any sample carries `<field>_raw`, only the raw readings are
/// averaged, so scaled and raw values are never mixed.
pub fn field_average(samples: &[AdcSample], field: &str) -> Option<f64> {
    let raw = format!("{field}_raw");
    let key = if samples.iter().any(|s| s.has_raw(field)) {
        raw.as_str()
    } else {
        field
    };
    let values: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.fields.get(key).and_then(Value::as_f64))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Accepted window for one averaged ADC field, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "FieldRange::default_max")]
    pub max: f64,
}

impl FieldRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn default_max() -> f64 {
        65536.0
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum RangeFailure {
    #[error("{field} missing in samples")]
    Missing { field: String },

    #[error("{field} out of range: {value:.1} (expected {min}~{max})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeReport {
    pub averages: BTreeMap<String, f64>,
    pub failures: Vec<RangeFailure>,
}

impl RangeReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Averages each field named in `ranges` and checks it against its window.
pub fn check_ranges(samples: &[AdcSample], ranges: &BTreeMap<String, FieldRange>) -> RangeReport {
    let mut report = RangeReport::default();
    for (field, range) in ranges {
        let Some(value) = field_average(samples, field) else {
            report.failures.push(RangeFailure::Missing {
                field: field.clone(),
            });
            continue;
        };
        report.averages.insert(field.clone(), value);
        if !range.contains(value) {
            report.failures.push(RangeFailure::OutOfRange {
                field: field.clone(),
                value,
                min: range.min,
                max: range.max,
            });
        }
    }
    report
}

/// Strongest neighbor, optionally restricted to one vendor and product.
pub fn select_strongest_neighbor<'a>(
    neighbors: &'a [Neighbor],
    filter: Option<(Vendor, Product)>,
) -> Option<&'a Neighbor> {
    neighbors
        .iter()
        .filter(|n| match filter {
            None => true,
            Some((vendor, product)) => {
                n.vid.as_ref().is_some_and(|v| vendor.matches(v))
                    && n.pid.as_ref().is_some_and(|p| product.matches(p))
            }
        })
        .max_by_key(|n| n.rssi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_id::DeviceId;
    use serde_json::json;

    fn samples(values: &[Value]) -> Vec<AdcSample> {
        values
            .iter()
            .map(|v| AdcSample::from_payload(DeviceId::new(1), v.as_object().cloned().unwrap()))
            .collect()
    }

    fn neighbor(id: &str, rssi: i32, vid: &str, pid: &str) -> Neighbor {
        serde_json::from_value(json!({"id": id, "rssi": rssi, "vid": vid, "pid": pid})).unwrap()
    }

    #[test]
    fn mesh_echo_verified() {
        let requested = MeshConfig::default().with_channel(39).with_asp_interval(10000);
        let echoed = MeshConfig::from_payload(
            json!({"l1": {"channel": 39, "txPwr": 4}, "l2": {"aspInterval": 10000}})
                .as_object()
                .unwrap(),
        );
        assert!(verify_mesh_config(&requested, Some(&echoed)).is_empty());
    }

    #[test]
    fn mesh_mismatch_and_missing_fail() {
        let requested = MeshConfig::default().with_channel(39).with_asp_interval(10000);
        let echoed = MeshConfig::default().with_channel(40);
        let errors = verify_mesh_config(&requested, Some(&echoed));
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], MeshFieldError::Mismatch { field, .. } if field == "l1.channel"));
        assert!(matches!(&errors[1], MeshFieldError::Missing { field } if field == "l2.asp_interval"));
        assert_eq!(verify_mesh_config(&requested, None), vec![MeshFieldError::NoReply]);
    }

    #[test]
    fn average_prefers_raw_readings() {
        let s = samples(&[json!({"vout": 10, "vout_raw": 100}), json!({"vout": 20})]);
        assert_eq!(field_average(&s, "vout"), Some(100.0));

        let s = samples(&[json!({"vout": 10}), json!({"vout": 20})]);
        assert_eq!(field_average(&s, "vout"), Some(15.0));
        assert_eq!(field_average(&s, "iout"), None);
    }

    #[test]
    fn ranges_report_every_field() {
        let s = samples(&[json!({"vin1": 500, "vout": 9000})]);
        let mut ranges = BTreeMap::new();
        ranges.insert("vin1".to_string(), FieldRange::new(400.0, 600.0));
        ranges.insert("vout".to_string(), FieldRange::new(0.0, 8000.0));
        ranges.insert("iout".to_string(), FieldRange::new(0.0, 10.0));

        let report = check_ranges(&s, &ranges);
        assert!(!report.passed());
        assert_eq!(report.averages["vin1"], 500.0);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .contains(&RangeFailure::Missing { field: "iout".into() }));
    }

    #[test]
    fn range_defaults() {
        let range: FieldRange = serde_json::from_value(json!({"min": 5})).unwrap();
        assert_eq!(range, FieldRange::new(5.0, 65536.0));
    }

    #[test]
    fn strongest_matching_neighbor() {
        let list = vec![
            neighbor("0x1", -70, "Conalog", "Guard_2_1"),
            neighbor("0x2", -40, "Nanoom", "Guard_2_1"),
            neighbor("0x3", -55, "Conalog", "Guard_2_1"),
        ];
        assert_eq!(select_strongest_neighbor(&list, None).unwrap().id, "0x2");
        assert_eq!(
            select_strongest_neighbor(&list, Some((Vendor::Conalog, Product::Guard21)))
                .unwrap()
                .id,
            "0x3"
        );
        assert!(select_strongest_neighbor(&list, Some((Vendor::Conalog, Product::Booster11))).is_none());
    }
}
