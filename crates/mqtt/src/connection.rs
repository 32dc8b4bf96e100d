//! The connection kernel: the single task that owns the broker connection.
//!
//! ```text
//! tick loop ──try_publish──> AsyncClient ──queue──> EventLoop <── ConnectionKernel
//!                                                      │
//!                                                 TCP to broker
//! ```
//!
//! The kernel polls the rumqttc event loop, which connects, keeps the
//! connection alive with pings and reconnects when polled again after an
//! error. Between attempts the kernel sleeps according to its `Backoff`.
//! Every state change goes out on a watch channel and to the optional status
//! callback; incoming publishes are fanned out on a broadcast channel.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build();
//! let mut kernel = ConnectionKernel::new(client, event_loop, config.backoff(), cancel);
//! let state_rx = kernel.subscribe_state();
//! tokio::spawn(async move { kernel.run().await });
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    backoff::Backoff,
    error::TransferError,
    state::{ConnectionState, StatusCallback},
};

/// Upper bound for flushing DISCONNECT to the broker during shutdown.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered incoming messages per subscriber before the slowest one lags.
const INCOMING_CHANNEL_CAPACITY: usize = 32;

/// A publish received from the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Owns the rumqttc event loop and keeps the broker session alive.
pub struct ConnectionKernel {
    /// Client handle, used here only to queue DISCONNECT
    client: AsyncClient,
    /// Polled by `run` and nowhere else
    event_loop: EventLoop,
    /// Set on an accepted CONNACK, cleared on any connection error
    is_connected: Arc<AtomicBool>,
    /// Delay schedule between failed attempts
    backoff: Backoff,
    /// Stops `run` after a best-effort DISCONNECT
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Fan-out of publishes received from the broker
    incoming_tx: broadcast::Sender<IncomingMessage>,
    on_status: Option<StatusCallback>,
}

impl ConnectionKernel {
    /// Creates a kernel in `Connecting`. Nothing touches the network until
    /// `run` is polled.
    ///
    /// # Arguments
    /// - `client`, `event_loop`: the pair returned by `ClientBuilder::build`
    /// - `backoff`: delay schedule between failed attempts
    /// - `cancel`: token that ends `run`
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (incoming_tx, _) = broadcast::channel(INCOMING_CHANNEL_CAPACITY);
        Self {
            client,
            event_loop,
            is_connected: Arc::new(AtomicBool::new(false)),
            backoff,
            cancel,
            state_tx,
            state_rx,
            incoming_tx,
            on_status: None,
        }
    }

    /// Registers a callback invoked on every state change, before the new
    /// state is published on the watch channel.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// The receiver sees the current state immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Sender side of the incoming message fan-out, for creating receivers.
    pub fn incoming_sender(&self) -> broadcast::Sender<IncomingMessage> {
        self.incoming_tx.clone()
    }

    /// Shared flag, `true` between an accepted CONNACK and the next error.
    pub fn is_connected(&self) -> Arc<AtomicBool> {
        self.is_connected.clone()
    }

    /// Records a state transition. Repeated identical states are not re-announced.
    fn update_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }

        info!("Connection state changed to: {}", state);
        if let Some(callback) = &self.on_status {
            callback(&state);
        }
        // send_replace keeps the value even with no receivers left
        self.state_tx.send_replace(state);
    }

    /// Drives the connection until cancelled.
    ///
    /// Connection errors are never fatal by themselves: the kernel reports
    /// them, waits for the backoff delay and polls again, which makes rumqttc
    /// reconnect.
    ///
    /// # Errors
    ///
    /// - `TransferError::RetriesPolicy` when a configured attempt limit is exhausted.
    /// - `TransferError::ClientConnection` when every client handle is gone and
    ///   there is nothing left to send.
    pub async fn run(&mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();

        info!("Starting connection event loop...");
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, closing broker connection...");
                    self.disconnect().await;
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            self.is_connected.store(false, Ordering::Release);

                            if matches!(e, ConnectionError::RequestsDone) {
                                warn!("All MQTT client handles dropped, stopping connection kernel");
                                self.update_state(ConnectionState::Disconnected(e.to_string()));
                                return Err(TransferError::from(e));
                            }

                            self.report_failure(&e);

                            let delay = match self.backoff.next_sleep() {
                                Ok(delay) => delay,
                                Err(backoff_err) => {
                                    error!("Maximum retry attempts exceeded: {}", backoff_err);
                                    self.update_state(ConnectionState::Disconnected(backoff_err.to_string()));
                                    return Err(backoff_err.into());
                                }
                            };

                            warn!(
                                "Reconnecting in {:.2} seconds due to error: {}",
                                delay.as_secs_f64(),
                                get_error_message(&e)
                            );
                            self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

                            tokio::select! {
                                _ = self.cancel.cancelled() => {
                                    info!("Shutdown requested while waiting to reconnect");
                                    self.update_state(ConnectionState::Disconnected("Shutdown requested".into()));
                                    return Ok(());
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }

                            self.update_state(ConnectionState::Connecting);
                        }
                    }
                }
            }
        }
    }

    fn report_failure(&self, err: &ConnectionError) {
        match refusal_code(err) {
            Some(code) => {
                error!("Broker refused connection, return code {}", code);
                self.update_state(ConnectionState::Refused(code));
            }
            None => {
                debug!("Connection error: {:?}", err);
                self.update_state(ConnectionState::Disconnected(get_error_message(err)));
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(conn_ack) => {
                    if conn_ack.code == ConnectReturnCode::Success {
                        info!("Connection established successfully.");
                        self.is_connected.store(true, Ordering::Release);
                        self.backoff.reset();
                        self.update_state(ConnectionState::Connected);
                    }
                }
                Packet::PingResp | Packet::PingReq => {}
                Packet::Publish(publish) => {
                    trace!("Received publish on topic {}", publish.topic);
                    let message = IncomingMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if self.incoming_tx.send(message).is_err() {
                        trace!("No listeners for incoming message on {}", publish.topic);
                    }
                }
                Packet::Disconnect => {
                    warn!("Disconnected by broker");
                    self.is_connected.store(false, Ordering::Release);
                    self.update_state(ConnectionState::Disconnected(
                        "Disconnected by broker".into(),
                    ));
                }
                _ => {}
            },
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
    }

    /// Sends DISCONNECT and polls until it has been written, bounded by
    /// `DISCONNECT_FLUSH_TIMEOUT`. Best effort: the socket is dropped with the
    /// event loop either way.
    async fn disconnect(&mut self) {
        let was_connected = self.is_connected.swap(false, Ordering::AcqRel);

        if was_connected {
            match self.client.try_disconnect() {
                Ok(()) => {
                    let event_loop = &mut self.event_loop;
                    let flush = async move {
                        loop {
                            match event_loop.poll().await {
                                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                                Ok(_) => continue,
                                Err(e) => {
                                    debug!("Event loop closed while flushing DISCONNECT: {}", e);
                                    break;
                                }
                            }
                        }
                    };
                    if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
                        .await
                        .is_err()
                    {
                        warn!("Timed out sending DISCONNECT to broker");
                    } else {
                        debug!("DISCONNECT sent to broker");
                    }
                }
                Err(e) => warn!("Error queueing disconnect packet: {}", e),
            }
        }

        self.update_state(ConnectionState::Disconnected("Shutdown requested".into()));
    }
}

/// Extracts the CONNACK return code from a broker refusal.
fn refusal_code(err: &ConnectionError) -> Option<u8> {
    match err {
        ConnectionError::ConnectionRefused(code) => Some(*code as u8),
        _ => None,
    }
}

/// Walks the source chain down to the root cause message.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
