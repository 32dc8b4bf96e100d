//! `[http]` table: the optional HTTP API sink.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,

    /// Endpoint receiving one POST per reading.
    #[validate(custom(function = "validate_http_url"))]
    pub url: String,

    /// Per-request timeout in seconds, covering connect and response.
    #[validate(range(min = 1, max = 120, message = "Timeout must be between 1 and 120 seconds"))]
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enabled: true,
            url: "http://localhost:5000/api/ritmo".to_string(),
            timeout: 5,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// The URL must parse and use http or https with a host.
fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    let reason = match Url::parse(url) {
        Ok(parsed) if !matches!(parsed.scheme(), "http" | "https") => {
            format!("unsupported scheme '{}'", parsed.scheme())
        }
        Ok(parsed) if parsed.host_str().map_or(true, str::is_empty) => "missing host".to_string(),
        Ok(_) => return Ok(()),
        Err(e) => e.to_string(),
    };

    let mut err = ValidationError::new("invalid_url");
    err.message = Some(format!("Not a valid http(s) URL ({reason}): {url}").into());
    Err(err)
}
