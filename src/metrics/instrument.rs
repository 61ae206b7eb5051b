//! Instrument capabilities
//!
//! The narrow interface the registry consumes from a metrics backend: a
//! provider hands out meters, meters create typed instruments, instruments
//! accept values with dimensional labels.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Dimensional labels attached to a single write
pub type Attributes = BTreeMap<String, String>;

/// Identity of the meter requested from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterScope {
    pub name: String,
    pub version: String,
    pub schema_url: String,
}

impl Default for MeterScope {
    fn default() -> Self {
        Self {
            name: "stats".to_string(),
            version: "1.2.0".to_string(),
            schema_url: "https://opentelemetry.io/schemas/1.2.0".to_string(),
        }
    }
}

/// Opaque propagation context passed along with histogram samples
///
/// Immutable once built; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: Option<Arc<BTreeMap<String, String>>>,
}

impl Context {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context carrying one more entry
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = self.entries.as_deref().cloned().unwrap_or_default();
        entries.insert(key.into(), value.into());
        Self {
            entries: Some(Arc::new(entries)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.as_ref()?.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.as_ref().map_or(true, |e| e.is_empty())
    }
}

/// Monotonic double counter
pub trait Counter: Send + Sync {
    fn add(&self, value: f64, attrs: &Attributes);
}

/// Signed integer counter accepting negative deltas
pub trait UpDownCounter: Send + Sync {
    fn add(&self, value: i64, attrs: &Attributes);
}

/// Double histogram
pub trait Histogram: Send + Sync {
    fn record(&self, value: f64, attrs: &Attributes, context: &Context);
}

/// Named handle instruments are created from
pub trait Meter: Send + Sync {
    fn create_double_counter(&self, name: &str) -> Arc<dyn Counter>;
    fn create_i64_up_down_counter(&self, name: &str) -> Arc<dyn UpDownCounter>;
    fn create_double_histogram(&self, name: &str) -> Arc<dyn Histogram>;
}

/// Process-wide factory of meters, wired to the exporters
pub trait MeterProvider: Send + Sync {
    fn meter(&self, scope: &MeterScope) -> Arc<dyn Meter>;
}
