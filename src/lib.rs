//! stats-meter - in-process metrics instrumentation
//!
//! This library gives server code cheap, fail-silent counters and scoped
//! latency timers, and forwards their values to Prometheus scrape and
//! periodic stream exporters.

pub mod config;
pub mod metrics;
pub mod util;

pub use config::{Config, MetricsConfig};
pub use crate::metrics::{global, LatencyCategory, MetricsError, Registry, ScopedLatency};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
