//! Destinations for encoded readings.
//!
//! A sink receives the same `EncodedReading` as every other sink in the tick.
//! `send` must not block longer than the sink's own timeout; failures are
//! returned to the tick loop, which logs them and moves on.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::message::EncodedReading;

pub mod http;
pub mod mqtt;

pub use self::{http::HttpSink, mqtt::MqttSink};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("MQTT publish failed: {0}")]
    Mqtt(#[from] cardiosim_mqtt::TransferError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered, but not with 2xx.
    #[error("HTTP endpoint answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Sink '{0}' is stopped")]
    Stopped(&'static str),
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn send(&self, message: &EncodedReading) -> Result<(), SinkError>;

    /// Releases the sink's resources. Called once during shutdown.
    async fn stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
