//! Simulation core: readings, wire format, tick loop and lifecycle.

pub mod alerts;
pub mod clock;
pub mod controller;
pub mod executor;
pub mod message;
pub mod reading;
