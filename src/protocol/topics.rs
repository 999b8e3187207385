//! Topic names shared with the bridge
//!
//! Topic strings are a wire contract: case- and path-sensitive. Outbound
//! topics are built here, inbound topics are classified by [`Topic::parse`].

pub const BRIDGE_TX: &str = "solar/bridge/tx";
pub const BRIDGE_RX: &str = "solar/bridge/rx";

pub fn device_tx(gateway: &str) -> String {
    format!("solar/device/{gateway}/tx")
}

pub fn device_rx(gateway: &str) -> String {
    format!("solar/device/{gateway}/rx")
}

pub fn device_result(gateway: &str) -> String {
    format!("solar/device/{gateway}/result")
}

pub fn mlpe_rx(device: &str) -> String {
    format!("solar/mlpe/{device}/rx")
}

pub fn mlpe_adc(device: &str) -> String {
    format!("solar/mlpe/{device}/adc")
}

pub fn feature_tx(gateway: &str) -> String {
    format!("solar/feature/{gateway}/tx")
}

pub fn feature_status(gateway: &str) -> String {
    format!("solar/feature/{gateway}/status")
}

/// Classification of an inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// `solar/bridge/rx`
    BridgeRx,
    /// `solar/device/<gateway>/rx`
    DeviceRx { gateway: String },
    /// `solar/device/<gateway>/result`
    DeviceResult { gateway: String },
    /// `solar/mlpe/<device>/rx`
    MlpeRx { device: String },
    /// `solar/mlpe/<device>/adc`
    MlpeAdc { device: String },
    /// `solar/feature/<gateway>/status`
    FeatureStatus { gateway: String },
}

impl Topic {
    /// Returns `None` for anything that is not one of the subscribed shapes,
    /// including our own outbound `tx` topics echoed by a wildcard subscription.
    pub fn parse(topic: &str) -> Option<Topic> {
        let parts: Vec<&str> = topic.split('/').collect();
        match parts.as_slice() {
            ["solar", "bridge", "rx"] => Some(Topic::BridgeRx),
            ["solar", "device", gw, "rx"] if !gw.is_empty() => Some(Topic::DeviceRx {
                gateway: gw.to_string(),
            }),
            ["solar", "device", gw, "result"] if !gw.is_empty() => Some(Topic::DeviceResult {
                gateway: gw.to_string(),
            }),
            ["solar", "mlpe", id, "rx"] if !id.is_empty() => Some(Topic::MlpeRx {
                device: id.to_string(),
            }),
            ["solar", "mlpe", id, "adc"] if !id.is_empty() => Some(Topic::MlpeAdc {
                device: id.to_string(),
            }),
            ["solar", "feature", gw, "status"] if !gw.is_empty() => Some(Topic::FeatureStatus {
                gateway: gw.to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_match_parser() {
        assert_eq!(
            Topic::parse(&device_rx("STICK1")),
            Some(Topic::DeviceRx {
                gateway: "STICK1".into()
            })
        );
        assert_eq!(
            Topic::parse(&device_result("STICK1")),
            Some(Topic::DeviceResult {
                gateway: "STICK1".into()
            })
        );
        assert_eq!(
            Topic::parse(&mlpe_rx("0x9FFD2FCA")),
            Some(Topic::MlpeRx {
                device: "0x9FFD2FCA".into()
            })
        );
        assert_eq!(
            Topic::parse(&mlpe_adc("0x9FFD2FCA")),
            Some(Topic::MlpeAdc {
                device: "0x9FFD2FCA".into()
            })
        );
        assert_eq!(
            Topic::parse(&feature_status("STICK1")),
            Some(Topic::FeatureStatus {
                gateway: "STICK1".into()
            })
        );
        assert_eq!(Topic::parse(BRIDGE_RX), Some(Topic::BridgeRx));
    }

    #[test]
    fn outbound_and_foreign_topics_are_ignored() {
        assert_eq!(Topic::parse(BRIDGE_TX), None);
        assert_eq!(Topic::parse(&device_tx("STICK1")), None);
        assert_eq!(Topic::parse("solar/device//rx"), None);
        assert_eq!(Topic::parse("Solar/bridge/rx"), None);
        assert_eq!(Topic::parse("solar/mlpe/0x1/rx/extra"), None);
    }
}
