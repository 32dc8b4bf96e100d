//! `[device]` table: what the simulated sensor publishes and how often.
//!
//! Topics are templates; `{device_id}` is replaced with the device id given on
//! the command line. They are resolved once at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{message::PayloadStyle, reading::HeartRate};

/// Placeholder substituted with the device id in topic templates.
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceConfig {
    /// Seconds between two readings.
    #[validate(range(min = 1, max = 3600, message = "Interval must be between 1 and 3600 seconds"))]
    pub interval: u64,

    /// Topic template for readings.
    #[validate(
        length(min = 1, message = "Topic must not be empty"),
        custom(function = "validate_topic_template")
    )]
    pub topic: String,

    /// Topic template for incoming alerts. Empty disables the alert inbox.
    #[validate(custom(function = "validate_topic_template"))]
    pub alert_topic: String,

    /// Name of the device key in the payload.
    pub payload_style: PayloadStyle,

    /// Readings above this many bpm are tachycardia.
    #[validate(custom(function = "validate_alert_limit"))]
    pub alert_limit: u16,

    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    pub retain: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            interval: 5,
            topic: "dispositivos/{device_id}/ritmo_cardiaco".to_string(),
            alert_topic: "dispositivos/{device_id}/alertas".to_string(),
            payload_style: PayloadStyle::default(),
            alert_limit: 100,
            qos: 0,
            retain: false,
        }
    }
}

impl DeviceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn topic_for(&self, device_id: &str) -> String {
        self.topic.replace(DEVICE_ID_PLACEHOLDER, device_id)
    }

    /// `None` when the alert inbox is disabled.
    pub fn alert_topic_for(&self, device_id: &str) -> Option<String> {
        (!self.alert_topic.is_empty())
            .then(|| self.alert_topic.replace(DEVICE_ID_PLACEHOLDER, device_id))
    }
}

fn validate_topic_template(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        let mut err = ValidationError::new("wildcard_in_topic");
        err.message = Some(format!("Topic must not contain wildcards: {topic}").into());
        return Err(err);
    }
    Ok(())
}

/// The limit must fall inside the range the generator can produce, and above
/// the bradycardia threshold.
fn validate_alert_limit(limit: u16) -> Result<(), ValidationError> {
    if (HeartRate::BRADYCARDIA_BELOW..=HeartRate::MAX).contains(&limit) {
        return Ok(());
    }
    let mut err = ValidationError::new("alert_limit_out_of_range");
    err.message = Some(
        format!(
            "Alert limit must be between {} and {} bpm",
            HeartRate::BRADYCARDIA_BELOW,
            HeartRate::MAX
        )
        .into(),
    );
    Err(err)
}
