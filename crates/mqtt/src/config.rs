//! Broker connection settings.
//!
//! All fields have defaults, so an empty `[transport]` table connects to a
//! local broker on 1883 with a 60 second keep-alive. Constraints are enforced
//! with `validator` when the application loads its configuration.
//!
//! ```toml
//! [transport]
//! host = "mqtt.example.com"
//! port = 1883
//! keep_alive = 60
//! base_topic = ""
//! reconnect_delay = 1
//! reconnect_max_delay = 60
//! reconnect_multiplier = 2.0
//! max_reconnect_attempts = 0  # unlimited
//! ```

use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{backoff::Backoff, error::TransferError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Optional namespace prepended to every topic (`{base_topic}/{topic}`).
    /// Empty disables the prefix.
    #[validate(
        length(max = 255, message = "Base topic must not exceed 255 characters"),
        custom(function = "validate_topic_name")
    )]
    pub base_topic: String,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Keep-alive interval in seconds; the client pings when idle this long.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Whether the broker should drop session state between connections.
    /// Subscriptions are restored by the supervisor either way.
    pub clean_session: bool,

    /// Client identifier. Left empty, a UUID is generated at build time.
    #[validate(length(max = 36, message = "Client ID must be at most 36 characters"))]
    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    #[validate(range(
        min = 64,
        max = 65535,
        message = "Max packet size must be between 64 and 65535 bytes"
    ))]
    pub max_packet_size: Option<u16>,

    /// Requests (publishes, subscribes) the client can queue while the
    /// event loop is busy or disconnected. Beyond this, publishes are dropped.
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: Option<u8>,

    /// Initial delay before the first reconnection attempt, in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Upper bound for the reconnection delay, in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect max delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_max_delay: u64,

    /// Growth factor applied to the delay after each failed attempt.
    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect multiplier must be between 1 and 30"
    ))]
    pub reconnect_multiplier: f64,

    /// Give up after this many consecutive failures. 0 retries forever.
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_topic: String::new(),
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: 60,
            clean_session: true,
            client_id: String::new(),
            username: None,
            password: None,
            max_packet_size: Some(65_535),
            request_channel_capacity: Some(10),
            reconnect_delay: 1,
            reconnect_max_delay: 60,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl Config {
    /// The client id to present to the broker.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("cardiosim-{}", Uuid::new_v4().simple())
                .chars()
                .take(36)
                .collect()
        } else {
            self.client_id.clone()
        }
    }

    /// Builds the reconnection schedule described by this configuration.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.reconnect_delay),
            Duration::from_secs(self.reconnect_max_delay),
            self.reconnect_multiplier,
        )
        .with_max_attempts(self.max_reconnect_attempts)
    }

    /// Applies `base_topic` to `topic`.
    pub fn with_base_topic(&self, topic: &str) -> String {
        join_topic(&self.base_topic, topic)
    }
}

/// Joins a namespace and a topic with exactly one separator.
pub fn join_topic(base_topic: &str, topic: &str) -> String {
    if base_topic.is_empty() {
        topic.to_string()
    } else {
        format!(
            "{}/{}",
            base_topic.trim_end_matches('/'),
            topic.trim_start_matches('/')
        )
    }
}

/// Topic names used for publishing must not contain wildcards.
fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        let mut err = ValidationError::new("wildcard_in_topic");
        err.message = Some(format!("Topic must not contain wildcards: {topic}").into());
        return Err(err);
    }
    Ok(())
}

/// Where and how a message is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EndpointMetadata {
    #[validate(length(min = 1, message = "Topic must not be empty"))]
    pub topic: String,

    /// 0 (at most once), 1 (at least once) or 2 (exactly once).
    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    pub retain: bool,
}

impl EndpointMetadata {
    /// QoS 0, not retained.
    pub fn at_most_once(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: 0,
            retain: false,
        }
    }

    pub fn qos_level(&self) -> Result<QoS, TransferError> {
        qos_from_u8(self.qos)
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, must be 0, 1, or 2"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keep_alive, 60);
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_base_topic_is_rejected() {
        let config = Config {
            base_topic: "clinic/#".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("host = \"broker.local\"\nport = 1884").unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1884);
        assert_eq!(config.keep_alive, 60);
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_effective_client_id() {
        let generated = Config::default().effective_client_id();
        assert!(generated.starts_with("cardiosim-"));
        assert!(generated.len() <= 36);

        let fixed = Config {
            client_id: "watch-1".into(),
            ..Default::default()
        };
        assert_eq!(fixed.effective_client_id(), "watch-1");
    }

    #[test]
    fn test_with_base_topic() {
        let config = Config {
            base_topic: "clinic/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.with_base_topic("/dispositivos/w1/ritmo_cardiaco"),
            "clinic/dispositivos/w1/ritmo_cardiaco"
        );
        assert_eq!(join_topic("", "a/b"), "a/b");
    }

    #[test]
    fn test_backoff_from_config() {
        let config = Config {
            reconnect_delay: 2,
            reconnect_max_delay: 10,
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        let backoff = config.backoff();
        assert_eq!(backoff.current_delay(), Duration::from_secs(2));
        assert_eq!(backoff.max_delay(), Duration::from_secs(10));
        assert_eq!(backoff.max_attempts(), Some(3));
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(
            qos_from_u8(3),
            Err(TransferError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_endpoint_metadata_at_most_once() {
        let meta = EndpointMetadata::at_most_once("a/b");
        assert_eq!(meta.qos, 0);
        assert!(!meta.retain);
        assert_eq!(meta.qos_level().unwrap(), QoS::AtMostOnce);
    }
}
