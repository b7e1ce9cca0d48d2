//! Logging setup for binaries embedding the formation logic.
//!
//! Library code only emits `tracing` events; a host process calls
//! [`init_tracing`] once at startup to install a subscriber.

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig};
pub use tracing_setup::init_tracing;
