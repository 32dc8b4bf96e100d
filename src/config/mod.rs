//! Application configuration: loading, overrides and validation.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file: `--config` / `CARDIOSIM_CONFIG`, else
//!    `/etc/cardiosim/config.toml` when it exists
//! 3. command line options and their environment variables
//!    (`BROKER_HOST`, `BROKER_PORT`, `API_URL`, `PUBLISH_INTERVAL`)
//!
//! The merged result is validated once and is immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::{device::DeviceConfig, http::HttpConfig, logger::LoggerConfig};

pub mod device;
pub mod http;
pub mod logger;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cardiosim/config.toml";

/// Timestamped console line for use before the tracing subscriber exists.
#[doc(hidden)]
#[macro_export]
macro_rules! print_line {
    ($level:expr, $($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(time::macros::format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                    ))
                    .unwrap_or_default()
            ).dim(),
            $level,
            format_args!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::print_line!(console::style("INFO").green(), $($arg)*)
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::print_line!(console::style("WARN").yellow(), $($arg)*)
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        $crate::print_line!(console::style("ERROR").red(), $($arg)*)
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

pub type TransportConfig = cardiosim_mqtt::Config;

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub device: DeviceConfig,

    #[validate(nested)]
    pub http: HttpConfig,

    #[validate(nested)]
    pub transport: TransportConfig,
}

/// Values given on the command line (or through their environment
/// variables). `None` keeps whatever the file or the defaults say.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub api_url: Option<String>,
    pub interval: Option<u64>,
    pub disable_http: bool,
}

impl Config {
    /// Builds the effective configuration from every source.
    ///
    /// # Errors
    ///
    /// `ConfigError::NotFound` when `explicit_path` points nowhere, otherwise
    /// IO, parse or validation errors.
    pub fn new(
        explicit_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match Self::resolve_path(explicit_path)? {
            Some(path) => Self::read(&path)?,
            None => {
                print_info!("No configuration file found, using built-in defaults");
                Config::default()
            }
        };

        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Picks the file to read, if any.
    fn resolve_path(explicit_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            print_info!("Using config from: {}", path.display());
            return Ok(Some(path.to_path_buf()));
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(Some(fallback.to_path_buf()));
        }

        Ok(None)
    }

    /// Loads and validates a configuration file without overrides.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());
        let config_str = fs::read_to_string(path)?;
        Ok(toml::from_str(&config_str)?)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.broker_host {
            self.transport.host = host.clone();
        }
        if let Some(port) = overrides.broker_port {
            self.transport.port = port;
        }
        if let Some(url) = &overrides.api_url {
            self.http.url = url.clone();
        }
        if let Some(interval) = overrides.interval {
            self.device.interval = interval;
        }
        if overrides.disable_http {
            self.http.enabled = false;
        }
    }
}
