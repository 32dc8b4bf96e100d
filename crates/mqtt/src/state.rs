//! Observable connection state.
//!
//! The connection kernel publishes a `ConnectionState` on a watch channel
//! whenever the link to the broker changes, and hands every transition to an
//! optional status callback. The supervisor watches the same channel to
//! restore subscriptions after a reconnect.
//!
//! ```text
//! Connecting ──(CONNACK 0)──> Connected ──(error)──> Disconnected
//!     │                                                   │
//!     └──(CONNACK != 0)──> Refused(code) ──> Reconnecting(secs) ──> Connecting
//! ```

use std::{fmt, sync::Arc};

/// CONNACK return code reported for an accepted connection.
pub const CONNACK_ACCEPTED: u8 = 0;

/// Invoked by the connection kernel on every state transition, from the
/// kernel's task. Must not block.
pub type StatusCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent (or about to be), waiting for CONNACK.
    Connecting,

    /// Broker accepted the connection.
    Connected,

    /// Broker answered CONNACK with a non-zero return code.
    Refused(u8),

    /// Link lost or never established; carries the root cause.
    Disconnected(String),

    /// Waiting this many seconds before the next attempt.
    Reconnecting(f64),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Refused(_) => "Refused",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Refused(code) => format!("code {code}"),
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
        }
    }

    /// The CONNACK return code behind this state, if the broker answered.
    ///
    /// `Some(0)` when connected, `Some(code)` when refused, `None` when the
    /// broker was never reached.
    pub fn return_code(&self) -> Option<u8> {
        match self {
            ConnectionState::Connected => Some(CONNACK_ACCEPTED),
            ConnectionState::Refused(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
