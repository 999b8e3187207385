//! Streamed ADC collection
//!
//! Unlike the correlated commands, raw ADC data is not one reply. The
//! gateway's `DUMP_RAW_ADC` feature streams samples for a requested
//! duration on `solar/mlpe/<device>/adc`, and progress is reported on the
//! feature status topic. Collection is a timed loop:
//!
//! ```text
//! clear buffer ─► issue DUMP_RAW_ADC ─► issue again every reissue_interval ─► window ends
//!                                                                                │
//!          return buffer ◄── margin elapsed, or SUCCESS after half the margin ◄──┘
//! ```

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::client::BridgeClient;
use super::correlator::publish_json;
use super::store::Payload;
use crate::device_id::DeviceId;
use crate::protocol::decode::{annotate_beacon, decode_beacon, json_u32, BeaconChannels};
use crate::protocol::envelope::{FeatureCommand, FEATURE_DUMP_RAW_ADC, STATUS_SUCCESS};
use crate::protocol::topics;

/// Status the gateway reports when a feature run aborted.
const STATUS_FAILED: &str = "FAILED";

/// One telemetry message from `solar/mlpe/<device>/adc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdcSample {
    pub device: DeviceId,
    pub received_at: DateTime<Local>,
    /// Present when the sample carried both packed words.
    pub channels: Option<BeaconChannels>,
    pub fields: Payload,
}

impl AdcSample {
    pub fn from_payload(device: DeviceId, mut fields: Payload) -> Self {
        let raw_0 = fields.get("raw_0").and_then(json_u32);
        let raw_1 = fields.get("raw_1").and_then(json_u32);
        annotate_beacon(&mut fields);
        Self {
            device,
            received_at: Local::now(),
            channels: raw_0.zip(raw_1).map(|(w0, w1)| decode_beacon(w0, w1)),
            fields,
        }
    }

    /// Numeric reading for `field`, taken from `<field>_raw` when the
    /// sample carries one.
    pub fn value(&self, field: &str) -> Option<f64> {
        self.fields
            .get(&format!("{field}_raw"))
            .and_then(Value::as_f64)
            .or_else(|| self.fields.get(field).and_then(Value::as_f64))
    }

    pub fn has_raw(&self, field: &str) -> bool {
        self.fields.contains_key(&format!("{field}_raw"))
    }
}

impl BridgeClient {
    /// Collects streamed ADC samples from `target` for the configured window.
    pub async fn collect_adc_samples(&self, target: &str, gateway: &str) -> Vec<AdcSample> {
        self.collect_adc_samples_for(target, gateway, self.adc.window())
            .await
    }

    /// Collects streamed ADC samples from `target` for `window`.
    ///
    /// Returns whatever arrived; an empty buffer after every round is the
    /// caller's failure to report.
    pub async fn collect_adc_samples_for(
        &self,
        target: &str,
        gateway: &str,
        window: Duration,
    ) -> Vec<AdcSample> {
        let device = DeviceId::parse_lossy(target);
        let device_key = device.to_string();
        self.subscriptions
            .ensure_subscribed(
                self.transport.as_ref(),
                &[topics::mlpe_adc(&device_key), topics::feature_status(gateway)],
            )
            .await;

        let rounds = self.adc.attempts.max(1);
        for round in 1..=rounds {
            self.store.clear_samples(device);
            self.store.clear_result(FEATURE_DUMP_RAW_ADC);

            info!(
                "Sending {} to {} via {} (window={:?})",
                FEATURE_DUMP_RAW_ADC, device, gateway, window
            );
            self.run_adc_window(device, gateway, window).await;

            let count = self.store.sample_count(device);
            info!(
                "{} finished for {}: {} samples",
                FEATURE_DUMP_RAW_ADC, device, count
            );
            if count > 0 {
                break;
            }
            if round < rounds {
                warn!(
                    "No ADC samples from {} (round {}/{}), retrying",
                    device, round, rounds
                );
            }
        }
        self.store.samples(device)
    }

    async fn run_adc_window(&self, device: DeviceId, gateway: &str, window: Duration) {
        let start = Instant::now();
        let window_end = start + window;
        let hard_end = window_end + self.adc.margin();
        // samples from the last slice are still in flight when the window closes
        let settle_end = window_end + self.adc.margin() / 2;
        let reissue = self.adc.reissue_interval();
        let feature_topic = topics::feature_tx(gateway);
        let mut next_issue = start;

        loop {
            let now = Instant::now();

            if now < window_end && now >= next_issue {
                let slice = (window_end - now).min(reissue);
                let command = FeatureCommand::dump_raw_adc(device, slice.as_secs_f64());
                match publish_json(self.transport.as_ref(), &feature_topic, &command).await {
                    Ok(()) => debug!("{} slice of {:?} requested", FEATURE_DUMP_RAW_ADC, slice),
                    Err(e) => warn!("Failed to request ADC dump from {}: {}", device, e),
                }
                next_issue = now + reissue;
            }

            match self.store.result(FEATURE_DUMP_RAW_ADC).as_deref() {
                Some(STATUS_SUCCESS) if now >= settle_end => break,
                Some(STATUS_FAILED) => {
                    warn!("{} failed for {}", FEATURE_DUMP_RAW_ADC, device);
                    break;
                }
                _ => {}
            }

            if now >= hard_end {
                break;
            }

            let mut wake = (now + self.settings.poll_interval()).min(hard_end);
            if now < window_end {
                wake = wake.min(next_issue);
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(v: Value) -> AdcSample {
        AdcSample::from_payload(DeviceId::new(0x10), v.as_object().cloned().unwrap())
    }

    #[test]
    fn packed_words_become_channels() {
        let s = sample(json!({"raw_0": 0x0001_0002u32, "raw_1": 0x0003_0004u32}));
        assert_eq!(
            s.channels,
            Some(BeaconChannels {
                vin1: 1,
                vin2: 2,
                iout: 3,
                vout: 4
            })
        );
        assert_eq!(s.value("vout"), Some(4.0));
    }

    #[test]
    fn raw_field_is_preferred() {
        let s = sample(json!({"vout": 100, "vout_raw": 2048}));
        assert!(s.has_raw("vout"));
        assert_eq!(s.value("vout"), Some(2048.0));
        assert_eq!(s.value("iout"), None);
    }

    #[test]
    fn single_word_has_no_channel_set() {
        let s = sample(json!({"raw_0": 5}));
        assert_eq!(s.channels, None);
        assert_eq!(s.value("vin1"), Some(5.0));
        assert_eq!(s.value("vin2"), Some(0.0));
    }
}
