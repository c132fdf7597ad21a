//! Utility types shared across the service.
//!
//! - [`b64`] - Base64 serde adapter for byte payloads
//! - [`money_amount`] - Human-readable coin amount parsing
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Tracing subscriber and OpenTelemetry setup

pub mod b64;
pub mod money_amount;
pub mod sig_down;
pub mod telemetry;

pub use money_amount::*;
pub use sig_down::*;
pub use telemetry::*;
