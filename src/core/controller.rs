//! Lifecycle of the simulator: STARTING -> RUNNING -> STOPPING.
//!
//! The controller owns the sinks. It runs the tick loop on its own task and
//! waits for either a shutdown request or the loop ending on its own (which
//! includes a panic inside a tick). Either way it then stops every sink
//! exactly once, in order, logging stop failures without skipping the
//! remaining sinks.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::Executor;
use crate::sink::Sink;

/// How long a tick already in progress may take to notice cancellation.
const TICK_ABANDON_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Starting => "STARTING",
            Phase::Running => "RUNNING",
            Phase::Stopping => "STOPPING",
        })
    }
}

/// Why the controller left RUNNING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future completed (Ctrl-C in the binary).
    Requested,
    /// The tick loop returned without being asked to.
    LoopEnded,
    /// The tick loop panicked.
    LoopPanicked(String),
}

/// Owns the sinks for the whole run and stops them on the way out.
pub struct Controller {
    phase: Phase,
    sinks: Vec<Arc<dyn Sink>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a controller in STARTING.
    ///
    /// # Arguments
    /// - `sinks`: every sink the tick loop will use; each is stopped once in
    ///   STOPPING, in this order
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            phase: Phase::Starting,
            sinks,
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sinks handed to the tick loop. The controller keeps its own references
    /// for shutdown.
    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.clone()
    }

    /// Cancelled once the controller enters STOPPING.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, phase: Phase) {
        info!("Lifecycle: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs `executor` until `shutdown` completes or the loop ends, then stops
    /// every sink. Consumes the controller, so sinks cannot be stopped twice.
    pub async fn run<F>(mut self, executor: Executor, shutdown: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        self.enter(Phase::Running);
        let mut handle = tokio::spawn(executor.run(self.cancel.child_token()));

        let reason = tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                StopReason::Requested
            }
            joined = &mut handle => match joined {
                Ok(()) => {
                    error!("Tick loop finished unexpectedly");
                    StopReason::LoopEnded
                }
                Err(e) if e.is_panic() => {
                    error!("Tick loop panicked: {}", e);
                    StopReason::LoopPanicked(e.to_string())
                }
                Err(e) => {
                    error!("Tick loop was cancelled: {}", e);
                    StopReason::LoopEnded
                }
            },
        };

        self.enter(Phase::Stopping);
        self.cancel.cancel();

        if !handle.is_finished() {
            match tokio::time::timeout(TICK_ABANDON_TIMEOUT, &mut handle).await {
                Ok(_) => debug!("Tick loop joined"),
                Err(_) => {
                    warn!("Tick loop did not stop in time, aborting it");
                    handle.abort();
                }
            }
        }

        self.stop_sinks().await;
        info!("Shutdown complete");
        reason
    }

    async fn stop_sinks(&mut self) {
        for sink in self.sinks.drain(..) {
            match sink.stop().await {
                Ok(()) => info!("Stopped {} sink", sink.name()),
                Err(e) => error!("Failed to stop {} sink: {}", sink.name(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        core::{
            clock::FixedClock,
            executor::tests::MockSink,
            message::EncodedReading,
            reading::{FixedHeartRate, HeartRate, HeartRateSource},
        },
        sink::SinkError,
    };

    fn executor_for(sinks: Vec<Arc<dyn Sink>>, interval: Duration) -> Executor {
        Executor::new(
            "watch1",
            Box::new(FixedHeartRate(HeartRate::new(75).unwrap())),
            Arc::new(FixedClock(1_700_000_000)),
            sinks,
        )
        .with_interval(interval)
    }

    #[tokio::test]
    async fn test_interrupt_during_sleep_stops_each_sink_once() {
        let sink = Arc::new(MockSink::default());
        let controller = Controller::new(vec![sink.clone()]);
        assert_eq!(controller.phase(), Phase::Starting);

        let executor = executor_for(controller.sinks(), Duration::from_secs(3600));
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

        let watched = sink.clone();
        let interrupter = tokio::spawn(async move {
            while watched.send_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = interrupt_tx.send(());
        });

        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            controller.run(executor, async {
                let _ = interrupt_rx.await;
            }),
        )
        .await
        .expect("controller did not stop");

        interrupter.await.unwrap();
        assert_eq!(reason, StopReason::Requested);
        assert_eq!(sink.stop_count(), 1);
        assert_eq!(sink.send_count(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_failure_does_not_skip_other_sinks() {
        let failing = Arc::new(MockSink::failing());
        let healthy = Arc::new(MockSink::default());
        let controller = Controller::new(vec![failing.clone(), healthy.clone()]);
        let executor = executor_for(controller.sinks(), Duration::from_secs(3600));

        let reason = controller.run(executor, std::future::ready(())).await;

        assert_eq!(reason, StopReason::Requested);
        assert_eq!(failing.stop_count(), 1);
        assert_eq!(healthy.stop_count(), 1);
        assert!(logs_contain("Failed to stop failing-mock sink"));
    }

    struct PanickingSource;

    impl HeartRateSource for PanickingSource {
        fn next_heart_rate(&mut self) -> HeartRate {
            panic!("sensor exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_loop_still_stops_sinks() {
        let sink = Arc::new(MockSink::default());
        let controller = Controller::new(vec![sink.clone()]);
        let executor = Executor::new(
            "watch1",
            Box::new(PanickingSource),
            Arc::new(FixedClock(1)),
            controller.sinks(),
        );

        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            controller.run(executor, std::future::pending()),
        )
        .await
        .expect("controller did not notice the panic");

        assert!(matches!(reason, StopReason::LoopPanicked(_)));
        assert_eq!(sink.stop_count(), 1);
    }

    /// Never answers, so a tick is always in flight.
    struct HangingSink;

    #[async_trait]
    impl Sink for HangingSink {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn send(&self, _message: &EncodedReading) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_interrupt_abandons_in_flight_tick() {
        let recorder = Arc::new(MockSink::default());
        let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(HangingSink), recorder.clone()];
        let controller = Controller::new(sinks);
        let executor = executor_for(controller.sinks(), Duration::from_millis(10));

        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            controller.run(executor, tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("in-flight tick blocked shutdown");

        assert_eq!(reason, StopReason::Requested);
        // The tick never got past the hanging sink.
        assert_eq!(recorder.send_count(), 0);
        assert_eq!(recorder.stop_count(), 1);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Starting.to_string(), "STARTING");
        assert_eq!(Phase::Stopping.to_string(), "STOPPING");
    }
}
