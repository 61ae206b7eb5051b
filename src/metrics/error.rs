//! Metrics boot errors
//!
//! Only pipeline setup can fail; recording never returns an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// The registry was shut down and cannot be initialized again
    #[error("metrics registry has been shut down")]
    ShutDown,

    /// The runtime hosting the exporter tasks could not be started
    #[error("failed to start exporter runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("invalid latency buckets: {0}")]
    InvalidBuckets(String),

    #[error("failed to build exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),
}
