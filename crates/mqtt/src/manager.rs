//! Wires the transport together and hands out an `MqttInstance`.
//!
//! `MqttManager::build_and_start` builds the client, spawns the connection
//! kernel and the supervisor, and returns immediately. The first connection
//! attempt happens in the background; nothing here waits for the broker.
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?
//!     .with_status_callback(Arc::new(|state| println!("{state}")))
//!     .build_and_start()
//!     .await?;
//!
//! instance.subscribe("dispositivos/w1/alertas").await?;
//! instance.publish(&EndpointMetadata::at_most_once("dispositivos/w1/ritmo_cardiaco"), body)?;
//! instance.shutdown().await;
//! ```
//!
//! All topics go through `base_topic` when one is configured.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, QoS, SubscribeFilter};
use tokio::{
    sync::{broadcast, watch, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{
    client::ClientBuilder,
    config::{join_topic, Config, EndpointMetadata},
    connection::{ConnectionKernel, IncomingMessage},
    error::TransferError,
    state::{ConnectionState, StatusCallback},
    supervisor::Supervisor,
};

/// How long `shutdown` waits for the kernel to flush DISCONNECT and exit.
const KERNEL_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Entry point for starting the transport.
///
/// Holds a validated configuration and an optional status callback until
/// `build_and_start` turns them into a running [`MqttInstance`].
pub struct MqttManager {
    /// Broker connection settings, already validated
    config: Config,
    /// Invoked by the kernel on every connection state change
    on_status: Option<StatusCallback>,
}

impl MqttManager {
    /// Creates a manager from a loaded configuration.
    ///
    /// # Arguments
    /// - `config`: broker settings, usually the `[transport]` table
    ///
    /// # Errors
    ///
    /// `TransferError::ConfigError` if the configuration fails validation.
    ///
    /// # Examples
    /// ```ignore
    /// let manager = MqttManager::from_config(cfg.transport.clone())?;
    /// ```
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            on_status: None,
        })
    }

    /// Creates a manager for `host:port` with every other setting at its default.
    ///
    /// # Arguments
    /// - `host`: broker hostname or IP
    /// - `port`: broker port, usually 1883
    ///
    /// # Examples
    /// ```ignore
    /// let instance = MqttManager::new("localhost", 1883)?.build_and_start().await?;
    /// ```
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TransferError> {
        Self::from_config(Config {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Registers a callback for every connection state transition.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// The validated configuration the instance will be built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the connection kernel and the supervisor in the background.
    ///
    /// Returns as soon as the tasks are spawned. The first connection attempt
    /// happens afterwards; watch [`MqttInstance::state_receiver`] to learn
    /// when the broker accepts the session.
    ///
    /// # Errors
    ///
    /// `TransferError::ConfigError` or `TransferError::ClientSetup` when the
    /// client cannot be built. Broker availability is not checked here.
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        let builder = ClientBuilder::from_config(&self.config)?;
        info!(
            "Starting MQTT transport for {}:{} as '{}'",
            self.config.host,
            self.config.port,
            builder.client_id()
        );
        let (client, event_loop) = builder.build();

        let cancel_token = CancellationToken::new();
        let mut kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            self.config.backoff(),
            cancel_token.clone(),
        );
        if let Some(callback) = self.on_status {
            kernel = kernel.with_status_callback(callback);
        }

        let state_rx = kernel.subscribe_state();
        let incoming_tx = kernel.incoming_sender();
        let subscriptions = SubscriptionManager::new(&self.config.base_topic, client.clone());

        let kernel_handle = tokio::spawn(async move {
            if let Err(e) = kernel.run().await {
                error!("MQTT connection kernel exited with error: {}", e);
            }
        });

        Supervisor::new(state_rx.clone(), subscriptions.clone(), cancel_token.clone()).monitor();

        Ok(MqttInstance {
            client,
            subscriptions,
            cancel_token,
            base_topic: self.config.base_topic,
            kernel_handle: Arc::new(Mutex::new(Some(kernel_handle))),
            incoming_tx,
            state_rx,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Topics the application wants to receive, kept across reconnects.
///
/// Topics are stored without `base_topic`; it is applied whenever a request
/// goes to the broker. All requests are queued without waiting, so a full
/// request queue is reported instead of blocking the caller.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    base_topic: String,
    topics: Arc<RwLock<BTreeSet<String>>>,
    client: AsyncClient,
}

impl SubscriptionManager {
    /// Creates an empty manager. `base_topic` is prefixed to every topic sent
    /// to the broker.
    pub fn new(base_topic: &str, client: AsyncClient) -> Self {
        Self {
            base_topic: base_topic.to_string(),
            topics: Arc::new(RwLock::new(BTreeSet::new())),
            client,
        }
    }

    pub fn with_base_topic(&self, topic: &str) -> String {
        join_topic(&self.base_topic, topic)
    }

    /// Registers a topic for the next (re)subscription without contacting the broker.
    pub async fn track(&self, topic: &str) {
        self.topics.write().await.insert(topic.to_string());
    }

    /// Registers the topic and subscribes right away.
    ///
    /// A failed immediate request is not an error: the topic stays registered
    /// and is subscribed when the supervisor sees the next `Connected`.
    pub async fn subscribe(&self, topic: &str) -> Result<(), TransferError> {
        self.track(topic).await;

        let full_topic = self.with_base_topic(topic);
        match self.client.try_subscribe(&full_topic, QoS::AtLeastOnce) {
            Ok(()) => info!("Subscribed to topic: {}", full_topic),
            Err(e) => warn!(
                "Immediate subscription to '{}' failed (will retry on reconnect): {}",
                full_topic, e
            ),
        }
        Ok(())
    }

    /// Forgets the topic and asks the broker to stop sending it.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransferError> {
        let full_topic = self.with_base_topic(topic);
        if let Err(e) = self.client.try_unsubscribe(&full_topic) {
            warn!("Failed to unsubscribe from '{}': {}", full_topic, e);
        }

        self.topics.write().await.remove(topic);
        Ok(())
    }

    /// Tracked topics in sorted order, without `base_topic`.
    pub async fn topics(&self) -> Vec<String> {
        self.topics.read().await.iter().cloned().collect()
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.read().await.contains(topic)
    }

    /// Subscribes every tracked topic in a single SUBSCRIBE.
    pub async fn resubscribe_all(&self) -> Result<(), TransferError> {
        let topics = self.topics.read().await;
        if topics.is_empty() {
            debug!("No topics to resubscribe to");
            return Ok(());
        }

        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(self.with_base_topic(topic), QoS::AtLeastOnce))
            .collect();

        info!("Resubscribing to {} topic(s)", filters.len());
        self.client.try_subscribe_many(filters)?;
        Ok(())
    }
}

/// Handle to a running transport. Cheap to clone; all clones share one
/// connection and one shutdown.
#[derive(Debug, Clone)]
pub struct MqttInstance {
    client: AsyncClient,
    subscriptions: SubscriptionManager,
    cancel_token: CancellationToken,
    base_topic: String,
    kernel_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    incoming_tx: broadcast::Sender<IncomingMessage>,
    state_rx: watch::Receiver<ConnectionState>,
    stopped: Arc<AtomicBool>,
}

impl MqttInstance {
    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn with_base_topic(&self, topic: &str) -> String {
        self.subscriptions.with_base_topic(topic)
    }

    /// Topics restored by the supervisor after every reconnect.
    pub fn subscription_manager(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Queues a publish without waiting for the network.
    ///
    /// # Errors
    ///
    /// - `TransferError::Stopped` after `shutdown`.
    /// - `TransferError::ConfigError` / `InvalidMetadata` for unusable metadata.
    /// - `TransferError::ClientTransfer` when the request queue is full; the
    ///   message is dropped.
    pub fn publish(&self, metadata: &EndpointMetadata, payload: Vec<u8>) -> Result<(), TransferError> {
        if self.is_stopped() {
            return Err(TransferError::Stopped);
        }
        metadata.validate()?;
        let qos = metadata.qos_level()?;

        let topic = self.with_base_topic(&metadata.topic);
        self.client
            .try_publish(topic, qos, metadata.retain, payload)?;
        Ok(())
    }

    /// Subscribes to `topic` (relative to `base_topic`) and keeps it across
    /// reconnects. Messages arrive on [`MqttInstance::incoming`].
    ///
    /// # Arguments
    /// - `topic`: topic filter without the base prefix
    ///
    /// # Errors
    ///
    /// `TransferError::Stopped` after `shutdown`. A full request queue is not
    /// an error; the subscription is retried on the next `Connected`.
    ///
    /// # Examples
    /// ```ignore
    /// instance.subscribe("dispositivos/w1/alertas").await?;
    /// let mut rx = instance.incoming();
    /// ```
    pub async fn subscribe(&self, topic: &str) -> Result<(), TransferError> {
        if self.is_stopped() {
            return Err(TransferError::Stopped);
        }
        self.subscriptions.subscribe(topic).await
    }

    /// Stops tracking `topic` and queues an UNSUBSCRIBE for it.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransferError> {
        self.subscriptions.unsubscribe(topic).await
    }

    /// A new receiver for messages on subscribed topics. Only messages that
    /// arrive after this call are seen.
    pub fn incoming(&self) -> broadcast::Receiver<IncomingMessage> {
        self.incoming_tx.subscribe()
    }

    /// Snapshot of the connection state as last reported by the kernel.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver for waiting on state changes, e.g. the first `Connected`.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// `true` once `shutdown` has been called on any clone.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Fires when the transport is shutting down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Disconnects and stops the background tasks. Idempotent: only the first
    /// call does any work.
    ///
    /// Bounded by `KERNEL_STOP_TIMEOUT`; a kernel that does not finish in time
    /// is aborted.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("MQTT instance already stopped");
            return;
        }

        info!("Shutting down MQTT transport");
        self.cancel_token.cancel();

        let Some(mut handle) = self.kernel_handle.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(KERNEL_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Connection kernel stopped"),
            Ok(Err(e)) => warn!("Connection kernel task failed: {}", e),
            Err(_) => {
                warn!("Connection kernel did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::test_broker::{contains, read_packet, TestBroker, SUBSCRIBE};

    fn unreachable_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            // Reserved port, nothing listens there.
            port: 9,
            client_id: "manager_test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_manager_from_config_validates() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            MqttManager::from_config(config),
            Err(TransferError::ConfigError(_))
        ));

        let manager = MqttManager::new("broker.local", 1884).unwrap();
        assert_eq!(manager.config().host, "broker.local");
        assert_eq!(manager.config().port, 1884);
    }

    #[tokio::test]
    async fn test_subscription_manager_tracks_topics() {
        let (client, _event_loop) = ClientBuilder::new("sub_test", "localhost", 1883, 10).build();
        let manager = SubscriptionManager::new("clinic", client);

        manager.subscribe("dispositivos/w1/alertas").await.unwrap();
        assert!(manager.is_subscribed("dispositivos/w1/alertas").await);
        assert_eq!(
            manager.with_base_topic("dispositivos/w1/alertas"),
            "clinic/dispositivos/w1/alertas"
        );

        manager.unsubscribe("dispositivos/w1/alertas").await.unwrap();
        assert!(manager.topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_with_full_queue_still_registers() {
        let (client, _event_loop) = ClientBuilder::new("sub_test", "localhost", 1883, 1).build();
        client
            .try_publish("filler", QoS::AtMostOnce, false, Vec::new())
            .unwrap();

        let manager = SubscriptionManager::new("", client);
        assert!(manager.subscribe("a/b").await.is_ok());
        assert!(manager.is_subscribed("a/b").await);
    }

    #[tokio::test]
    async fn test_resubscribe_all_without_topics_is_noop() {
        let (client, _event_loop) = ClientBuilder::new("sub_test", "localhost", 1883, 1).build();
        let manager = SubscriptionManager::new("", client);
        assert!(manager.resubscribe_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_build_and_start_without_broker() {
        let instance = MqttManager::from_config(unreachable_config())
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        assert!(!instance.state().is_connected());
        assert!(!instance.is_stopped());

        // Publishing while disconnected queues or reports, it never blocks.
        let meta = EndpointMetadata::at_most_once("dispositivos/w1/ritmo_cardiaco");
        let _ = instance.publish(&meta, b"{}".to_vec());

        instance.shutdown().await;
        assert!(instance.is_stopped());
        assert!(instance.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_blocks_publish() {
        let instance = MqttManager::from_config(unreachable_config())
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        instance.shutdown().await;
        instance.clone().shutdown().await;

        let meta = EndpointMetadata::at_most_once("a/b");
        assert!(matches!(
            instance.publish(&meta, Vec::new()),
            Err(TransferError::Stopped)
        ));
        assert!(matches!(
            instance.subscribe("a/b").await,
            Err(TransferError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_invalid_metadata_is_rejected() {
        let instance = MqttManager::from_config(unreachable_config())
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        let meta = EndpointMetadata {
            topic: "a/b".into(),
            qos: 3,
            retain: false,
        };
        assert!(instance.publish(&meta, Vec::new()).is_err());

        instance.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_callback_reports_failed_attempt() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();

        let instance = MqttManager::from_config(unreachable_config())
            .unwrap()
            .with_status_callback(Arc::new(move |state: &ConnectionState| {
                sink.lock().unwrap().push(state.clone());
            }))
            .build_and_start()
            .await
            .unwrap();

        let mut state_rx = instance.state_receiver();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(*state_rx.borrow_and_update(), ConnectionState::Reconnecting(_)) {
                state_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("no failed attempt reported");

        instance.shutdown().await;

        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|state| matches!(state, ConnectionState::Disconnected(_))));
        assert!(seen.iter().all(|state| !state.is_connected()));
    }

    #[tokio::test]
    async fn test_subscription_is_restored_after_reconnect() {
        let broker = TestBroker::bind().await;
        let instance = MqttManager::new("127.0.0.1", broker.port())
            .unwrap()
            .build_and_start()
            .await
            .unwrap();
        let mut state_rx = instance.state_receiver();

        let mut first = broker.accept(0).await;
        tokio::time::timeout(Duration::from_secs(5), state_rx.wait_for(ConnectionState::is_connected))
            .await
            .expect("never connected")
            .unwrap();

        instance.subscribe("dispositivos/w1/alertas").await.unwrap();
        let (header, body) = read_packet(&mut first).await;
        assert_eq!(header, SUBSCRIBE);
        assert!(contains(&body, "dispositivos/w1/alertas"));

        drop(first);
        let mut second = tokio::time::timeout(Duration::from_secs(5), broker.accept(0))
            .await
            .expect("transport did not reconnect");

        let (header, body) = tokio::time::timeout(Duration::from_secs(5), read_packet(&mut second))
            .await
            .expect("subscription was not restored");
        assert_eq!(header, SUBSCRIBE);
        assert!(contains(&body, "dispositivos/w1/alertas"));

        instance.shutdown().await;
    }
}
