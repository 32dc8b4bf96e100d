//! Publishes readings on the device topic through the shared MQTT instance.

use async_trait::async_trait;
use cardiosim_mqtt::{EndpointMetadata, MqttInstance};
use tracing::debug;

use super::{Sink, SinkError};
use crate::core::message::EncodedReading;

/// Publishes readings through a running MQTT transport. Stopping the sink
/// shuts the transport down.
pub struct MqttSink {
    instance: MqttInstance,
    endpoint: EndpointMetadata,
}

impl MqttSink {
    /// `endpoint.topic` is the resolved topic without `base_topic`.
    pub fn new(instance: MqttInstance, endpoint: EndpointMetadata) -> Self {
        Self { instance, endpoint }
    }

    pub fn topic(&self) -> String {
        self.instance.with_base_topic(&self.endpoint.topic)
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn send(&self, message: &EncodedReading) -> Result<(), SinkError> {
        self.instance
            .publish(&self.endpoint, message.body.clone())
            .map_err(|e| match e {
                cardiosim_mqtt::TransferError::Stopped => SinkError::Stopped(self.name()),
                other => SinkError::Mqtt(other),
            })?;
        debug!("Queued reading on {}", self.endpoint.topic);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        self.instance.shutdown().await;
        Ok(())
    }
}

/// Cancels the connection kernel if the sink goes away without `stop`.
impl Drop for MqttSink {
    fn drop(&mut self) {
        if !self.instance.is_stopped() {
            self.instance.cancel_token().cancel();
        }
    }
}
