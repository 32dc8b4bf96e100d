//! Command line interface.
//!
//! ```text
//! cardiosim [OPTIONS] <DEVICE>
//! ```
//!
//! Every option except `--no-http` can also come from an environment
//! variable. Command line and environment both override the config file.

use std::{ffi::OsString, path::PathBuf};

use clap::{error::ErrorKind, Parser};

use crate::config::ConfigOverrides;

/// Exit code for usage errors, including a missing device id.
pub const USAGE_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Parser)]
#[command(name = "cardiosim", version, about = "Simulated wearable heart-rate sensor")]
pub struct Cli {
    /// Device identifier, used in the payload and in topic templates
    #[arg(value_parser = parse_device_id)]
    pub device: String,

    /// MQTT broker host
    #[arg(long, env = "BROKER_HOST")]
    pub broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "BROKER_PORT")]
    pub broker_port: Option<u16>,

    /// HTTP endpoint receiving each reading
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Seconds between readings
    #[arg(long, env = "PUBLISH_INTERVAL")]
    pub interval: Option<u64>,

    /// Publish over MQTT only
    #[arg(long)]
    pub no_http: bool,

    /// Configuration file
    #[arg(long, short, env = "CARDIOSIM_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parses `args` (program name first).
    ///
    /// # Errors
    ///
    /// The clap error for bad usage, `--help` or `--version`; see
    /// [`exit_code`] for how each should end the process.
    pub fn try_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            broker_host: self.broker_host.clone(),
            broker_port: self.broker_port,
            api_url: self.api_url.clone(),
            interval: self.interval,
            disable_http: self.no_http,
        }
    }
}

/// Help and version exit 0; every usage error exits 1.
pub fn exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => USAGE_EXIT_CODE,
    }
}

/// A device id becomes one topic level, so it must be non-empty and free of
/// separators and wildcards.
fn parse_device_id(raw: &str) -> Result<String, String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err("device id must not be empty".to_string());
    }
    if id.contains(['/', '+', '#']) {
        return Err(format!("device id must not contain '/', '+' or '#': {id}"));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_only() {
        let cli = Cli::try_from_args(["cardiosim", "watch1"]).unwrap();
        assert_eq!(cli.device, "watch1");
        assert!(!cli.no_http);

        let overrides = cli.overrides();
        assert!(!overrides.disable_http);
        assert_eq!(overrides.interval, None);
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::try_from_args([
            "cardiosim",
            "--broker-host",
            "10.0.0.5",
            "--broker-port",
            "1884",
            "--api-url",
            "http://api.local/api/ritmo",
            "--interval",
            "2",
            "--no-http",
            "--config",
            "/tmp/cardiosim.toml",
            "watch1",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.broker_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(overrides.broker_port, Some(1884));
        assert_eq!(overrides.api_url.as_deref(), Some("http://api.local/api/ritmo"));
        assert_eq!(overrides.interval, Some(2));
        assert!(overrides.disable_http);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cardiosim.toml")));
    }

    #[test]
    fn test_missing_device_is_a_usage_error() {
        let err = Cli::try_from_args(["cardiosim"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_device_with_separator_is_rejected() {
        let err = Cli::try_from_args(["cardiosim", "ward/7"]).unwrap_err();
        assert_eq!(exit_code(&err), 1);
        assert!(Cli::try_from_args(["cardiosim", "  "]).is_err());
    }

    #[test]
    fn test_help_exits_zero() {
        let err = Cli::try_from_args(["cardiosim", "--help"]).unwrap_err();
        assert_eq!(exit_code(&err), 0);
    }
}
