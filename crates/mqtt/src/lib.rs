//! # cardiosim-mqtt
//!
//! MQTT transport for the heart-rate simulator, built on `rumqttc`.
//!
//! The crate keeps one broker connection alive in the background and never
//! blocks the caller: publishes are queued with `try_publish`, a full queue is
//! reported as an error, and reconnection follows an exponential backoff that
//! retries forever unless a limit is configured.
//!
//! ```text
//! MqttManager ──build_and_start──> MqttInstance ─┬─ publish / subscribe
//!                                                │
//!                 ┌──────────────────────────────┤
//!                 ▼                              ▼
//!          ConnectionKernel ──watch──>      Supervisor
//!          (polls EventLoop,               (resubscribes on
//!           backoff, DISCONNECT)            every Connected)
//! ```
//!
//! ```ignore
//! let instance = cardiosim_mqtt::MqttManager::from_config(config)?
//!     .build_and_start()
//!     .await?;
//! instance.publish(&EndpointMetadata::at_most_once("dispositivos/w1/ritmo_cardiaco"), body)?;
//! instance.shutdown().await;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_broker;

pub use config::{Config, EndpointMetadata};
pub use connection::{ConnectionKernel, IncomingMessage};
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager, SubscriptionManager};
pub use state::{ConnectionState, StatusCallback};
pub use supervisor::Supervisor;

pub type Result<T> = std::result::Result<T, TransferError>;
