//! The tick loop.
//!
//! Every tick: draw a heart rate, stamp it, encode it once, hand the bytes to
//! every sink in order and log each outcome. Then sleep for the interval.
//! Sink failures end the tick, never the loop.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{
    clock::Clock,
    message::{EncodedReading, PayloadStyle},
    reading::{HeartRateSource, Reading},
};
use crate::sink::Sink;

/// What happened in one tick.
#[derive(Debug)]
pub struct TickReport {
    /// The bytes every sink received
    pub message: EncodedReading,
    /// Sinks that accepted the reading
    pub delivered: usize,
    /// Sinks that returned an error
    pub failed: usize,
}

/// Drives the simulated sensor: one reading per interval, fanned out to
/// every sink.
pub struct Executor {
    /// Device id written into every payload
    device_id: String,
    /// Where heart rates come from; random in production, fixed in tests
    source: Box<dyn HeartRateSource>,
    /// Timestamp source, read once per tick
    clock: Arc<dyn Clock>,
    /// Destinations, tried in order on every tick
    sinks: Vec<Arc<dyn Sink>>,
    /// Name of the device key in the payload
    style: PayloadStyle,
    /// Pause between the end of one tick and the start of the next
    interval: Duration,
    /// Readings above this are logged as tachycardia
    alert_limit: u16,
}

impl Executor {
    /// Creates an executor with the default style, a 5 second interval and
    /// an alert limit of 100 bpm.
    ///
    /// # Arguments
    /// - `device_id`: identifier placed in every payload
    /// - `source`: heart rate generator
    /// - `clock`: timestamp source
    /// - `sinks`: destinations for each encoded reading
    ///
    /// # Examples
    /// ```ignore
    /// let executor = Executor::new(
    ///     "watch1",
    ///     Box::new(RandomHeartRate::from_entropy()),
    ///     Arc::new(SystemClock),
    ///     sinks,
    /// )
    /// .with_interval(Duration::from_secs(2));
    /// ```
    pub fn new(
        device_id: impl Into<String>,
        source: Box<dyn HeartRateSource>,
        clock: Arc<dyn Clock>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            source,
            clock,
            sinks,
            style: PayloadStyle::default(),
            interval: Duration::from_secs(5),
            alert_limit: 100,
        }
    }

    pub fn with_style(mut self, style: PayloadStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_alert_limit(mut self, alert_limit: u16) -> Self {
        self.alert_limit = alert_limit;
        self
    }

    /// Produces and distributes one reading.
    ///
    /// # Errors
    ///
    /// Only encoding can fail; sink errors are logged and counted.
    #[instrument(skip(self), fields(device = %self.device_id))]
    pub async fn tick(&mut self) -> Result<TickReport, serde_json::Error> {
        let heart_rate = self.source.next_heart_rate();
        let reading = Reading::new(self.device_id.clone(), heart_rate, self.clock.now_unix());

        let rhythm = heart_rate.assess(self.alert_limit);
        if rhythm.is_dangerous() {
            warn!("Reading {} assessed as {}", heart_rate, rhythm);
        } else {
            debug!("Reading {} assessed as {}", heart_rate, rhythm);
        }

        let message = EncodedReading::encode(reading, self.style)?;

        let mut delivered = 0;
        let mut failed = 0;
        for sink in &self.sinks {
            match sink.send(&message).await {
                Ok(()) => {
                    delivered += 1;
                    info!("Sent via {}: {}", sink.name(), message.as_str());
                }
                Err(e) => {
                    failed += 1;
                    error!("Failed to send via {}: {}", sink.name(), e);
                }
            }
        }

        Ok(TickReport {
            message,
            delivered,
            failed,
        })
    }

    /// Ticks until `cancel` fires. A tick in progress when it fires is
    /// abandoned.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Publishing readings for '{}' every {}s to {} sink(s)",
            self.device_id,
            self.interval.as_secs_f64(),
            self.sinks.len()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.tick() => {
                    if let Err(e) = result {
                        error!("Failed to encode reading: {}", e);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        info!("Tick loop stopped");
    }
}
