//! Metrics collection and export for herald.
//!
//! Metric names live in one place so dashboards and the delivery engine agree
//! on them. Recording goes through the `metrics` crate facade; when the
//! `prometheus` feature is enabled, [`init_metrics`] installs a Prometheus
//! recorder whose output is available through [`MetricsHandle::render`].
//!
//! ```rust,ignore
//! use herald_metrics::{counter, labels, mailer};
//!
//! counter!(mailer::SENDS_TOTAL, labels::OUTCOME => "success").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
