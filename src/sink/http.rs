//! POSTs each reading as JSON to the HTTP API.
//!
//! One request per reading, never retried. The client-wide timeout bounds
//! connect, send and response together, so a dead endpoint delays the tick by
//! at most `timeout`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use tracing::debug;

use super::{Sink, SinkError};
use crate::{config::http::HttpConfig, core::message::EncodedReading};

/// Longest slice of an error response body kept in the error.
const MAX_ERROR_BODY: usize = 256;

/// POSTs readings to one fixed URL.
pub struct HttpSink {
    client: Client,
    url: String,
}

impl HttpSink {
    /// Creates a sink posting to `url`.
    ///
    /// # Arguments
    /// - `url`: endpoint receiving the JSON body
    /// - `timeout`: bound on each request, connect and response included
    ///
    /// # Errors
    ///
    /// `SinkError::Http` if the HTTP client cannot be built (TLS backend
    /// initialization).
    ///
    /// # Examples
    /// ```ignore
    /// let sink = HttpSink::new("http://localhost:5000/api/ritmo", Duration::from_secs(5))?;
    /// ```
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self, SinkError> {
        Self::new(config.url.clone(), config.timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, message: &EncodedReading) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(message.body.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(SinkError::Status { status, body });
        }

        debug!("HTTP endpoint accepted reading with {}", status);
        Ok(())
    }
}
