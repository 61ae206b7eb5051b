//! Metrics and observability
//!
//! Fail-silent counters and scoped latency timers forwarded to pluggable
//! exporters.

mod error;
mod exporter;
mod instrument;
mod latency;
mod recorder;
mod registry;

pub use error::MetricsError;
pub use exporter::{write_snapshot, ExporterPipeline};
pub use instrument::*;
pub use latency::{method_name, LatencyCategory, ScopedLatency, UnknownCategory};
pub use recorder::RecorderProvider;
pub use registry::{global, Registry};
