//! cardiosim: a simulated wearable heart-rate sensor.
//!
//! On a fixed interval the simulator draws a heart rate between 30 and 130
//! bpm, encodes it as JSON and delivers it to an MQTT topic and, optionally,
//! to an HTTP API. It also listens on its alert topic for messages from the
//! monitoring dashboard.
//!
//! ## Modules
//!
//! * `cli` - command line arguments and their environment variables.
//! * `config` - TOML configuration, overrides and validation.
//! * `core` - heart-rate source, payload encoding, tick loop, lifecycle
//!   controller and alert inbox.
//! * `sink` - the `Sink` trait with its MQTT and HTTP implementations.
//! * `logger` - `tracing` subscriber setup (console and journald).
//!
//! The MQTT connection itself lives in the `cardiosim-mqtt` crate.

pub mod cli;
pub mod config;
pub mod core;
pub mod logger;
pub mod sink;
