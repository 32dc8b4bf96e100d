//! Builds the rumqttc `AsyncClient` / `EventLoop` pair.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::new("watch-1", "localhost", 1883, 10)
//!     .keep_alive(60)
//!     .build();
//!
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build();
//! ```
//!
//! The client is cheap to clone and safe to use from any task. The event loop
//! must be polled by exactly one task (the connection kernel).

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use validator::Validate;

use super::{config::Config, error::TransferError};

pub struct ClientBuilder {
    opts: MqttOptions,
    /// Capacity of the request queue between client handles and the event loop.
    cap: usize,
}

impl ClientBuilder {
    pub fn new(
        client_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cap: usize,
    ) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap: cap.max(1),
        }
    }

    /// Creates a builder from validated configuration.
    ///
    /// # Errors
    ///
    /// `TransferError::ConfigError` if the configuration fails validation.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        config.validate()?;

        let mut builder = Self::new(
            config.effective_client_id(),
            config.host.clone(),
            config.port,
            config.request_channel_capacity.unwrap_or(10) as usize,
        )
        .keep_alive(config.keep_alive)
        .clean_session(config.clean_session);

        if let Some(max_packet_size) = config.max_packet_size {
            builder = builder.max_packet_size(max_packet_size as usize, max_packet_size as usize);
        }

        match (&config.username, &config.password) {
            (Some(user), Some(pass)) => builder = builder.credentials(user, pass),
            (Some(user), None) => builder = builder.credentials(user, ""),
            (None, Some(_)) => {
                return Err(TransferError::ClientSetup(
                    "password is set but username is missing".into(),
                ))
            }
            (None, None) => {}
        }

        Ok(builder)
    }

    /// The broker closes the connection after 1.5x this interval without traffic;
    /// the event loop pings before that happens.
    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn max_packet_size(mut self, incoming: usize, outgoing: usize) -> Self {
        self.opts.set_max_packet_size(incoming, outgoing);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    pub fn build(self) -> (AsyncClient, EventLoop) {
        AsyncClient::new(self.opts, self.cap)
    }
}
