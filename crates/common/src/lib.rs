//! Shared configuration, error types, and observability primitives for partq crates.
//!
//! Architecture role:
//! - defines the worker configuration passed across layers
//! - provides common [`PartqError`] / [`Result`] contracts
//! - hosts per-invocation metrics, stage timers, and best-effort perf sinks
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]
//! - [`perf`]
//! - [`prom`]

pub mod config;
pub mod error;
pub mod metrics;
pub mod perf;
pub mod prom;

pub use config::WorkerConfig;
pub use error::{PartqError, Result};
pub use metrics::{MetricsSnapshot, StageTimer, StageTimers, WorkerMetrics};
pub use prom::global_metrics;
