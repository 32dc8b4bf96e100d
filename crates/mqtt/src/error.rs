//! Error type for the MQTT transport.
//!
//! `TransferError` aggregates everything that can go wrong between the
//! application and the broker: invalid settings, a request queue that cannot
//! accept more work, and connection failures surfaced by the event loop.
//!
//! Only setup errors are meant to stop the process. Publish and connection
//! errors are reported to the caller for logging; the connection kernel keeps
//! reconnecting on its own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Topic, QoS or retain settings are not usable for a publish.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Client construction failed (bad host, unusable options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Settings failed `validator` checks.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The local client could not queue the request: the queue is full or
    /// the event loop is gone. The message is dropped.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// The event loop lost or could not establish the broker connection.
    ///
    /// Boxed because `rumqttc::ConnectionError` is large.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// A configured reconnection limit was exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    /// The instance was already shut down.
    #[error("MQTT instance is stopped")]
    Stopped,
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::InvalidMetadata("QoS must be 0-2".into());
        assert_eq!(err.to_string(), "Invalid metadata: QoS must be 0-2");
    }

    #[test]
    fn test_transfer_error_from_connection_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: TransferError = rumqttc::ConnectionError::Io(io_err).into();
        assert!(matches!(err, TransferError::ClientConnection(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_stopped_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(TransferError::Stopped);
        assert_eq!(err.to_string(), "MQTT instance is stopped");
    }
}
