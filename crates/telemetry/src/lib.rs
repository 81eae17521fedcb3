//! Cost estimation for Taskloom.
//!
//! Holds the built-in per-million-token pricing table (with prompt-cache
//! prices) that providers use to fill in [`ModelInfo`] costs, plus runtime
//! overrides from configuration.
//!
//! [`ModelInfo`]: taskloom_core::ModelInfo

pub mod pricing;

pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid price for {model}: {reason}")]
    InvalidPrice { model: String, reason: String },
}
