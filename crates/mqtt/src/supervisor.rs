//! Restores subscriptions after the broker connection comes back.
//!
//! The supervisor runs as its own task next to the connection kernel. It does
//! not touch the connection; it only reacts to `Connected` transitions by
//! asking the `SubscriptionManager` to subscribe everything again, which is
//! required when the broker drops session state (`clean_session = true`).

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{manager::SubscriptionManager, state::ConnectionState};

#[derive(Debug, Clone)]
pub struct Supervisor {
    state_rx: watch::Receiver<ConnectionState>,
    subscriptions: SubscriptionManager,
    cancel_token: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor; call `monitor` to start it.
    ///
    /// # Arguments
    /// - `state_rx`: the kernel's state channel
    /// - `subscriptions`: topics to restore on every `Connected`
    /// - `cancel`: token that ends the monitor loop
    pub fn new(
        state_rx: watch::Receiver<ConnectionState>,
        subscriptions: SubscriptionManager,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            state_rx,
            subscriptions,
            cancel_token,
        }
    }

    async fn on_connect(&self) {
        if let Err(e) = self.subscriptions.resubscribe_all().await {
            warn!("Failed to restore subscriptions after connect: {}", e);
        }
    }

    /// Spawns the monitoring loop and returns immediately.
    pub fn monitor(&self) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run_monitor_loop().await })
    }

    /// Watches state transitions until cancelled or the kernel is gone.
    pub async fn run_monitor_loop(mut self) {
        if self.state_rx.borrow_and_update().is_connected() {
            info!("Already connected when supervisor started");
            self.on_connect().await;
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Supervisor stopping on cancellation");
                    break;
                }
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        debug!("Connection kernel dropped its state channel, supervisor stopping");
                        break;
                    }
                    let state = self.state_rx.borrow_and_update().clone();
                    if state.is_connected() {
                        self.on_connect().await;
                    }
                }
            }
        }
    }
}
