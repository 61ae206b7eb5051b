//! `metrics` crate backend
//!
//! Implements the instrument capabilities on top of any [`metrics::Recorder`],
//! so the Prometheus recorder built by the exporter pipeline can serve as the
//! registry's provider without being installed as the global recorder.

use metrics::{Key, Label, Level, Metadata, Recorder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::instrument::{
    Attributes, Context, Counter, Histogram, Meter, MeterProvider, MeterScope, UpDownCounter,
};

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Meter provider backed by a `metrics` recorder
pub struct RecorderProvider<R> {
    recorder: Arc<R>,
}

impl<R: Recorder + Send + Sync + 'static> RecorderProvider<R> {
    pub fn new(recorder: R) -> Self {
        Self {
            recorder: Arc::new(recorder),
        }
    }

    /// Underlying recorder
    pub fn recorder(&self) -> &R {
        &self.recorder
    }
}

impl<R: Recorder + Send + Sync + 'static> MeterProvider for RecorderProvider<R> {
    fn meter(&self, scope: &MeterScope) -> Arc<dyn Meter> {
        Arc::new(RecorderMeter {
            recorder: self.recorder.clone(),
            scope: scope.name.clone(),
        })
    }
}

struct RecorderMeter<R> {
    recorder: Arc<R>,
    scope: String,
}

impl<R: Recorder + Send + Sync + 'static> Meter for RecorderMeter<R> {
    fn create_double_counter(&self, name: &str) -> Arc<dyn Counter> {
        debug!(meter = %self.scope, name, "Creating counter");
        Arc::new(RecorderCounter {
            recorder: self.recorder.clone(),
            name: name.to_string(),
            carry: Mutex::new(HashMap::new()),
        })
    }

    fn create_i64_up_down_counter(&self, name: &str) -> Arc<dyn UpDownCounter> {
        debug!(meter = %self.scope, name, "Creating up-down counter");
        Arc::new(RecorderUpDownCounter {
            recorder: self.recorder.clone(),
            name: name.to_string(),
        })
    }

    fn create_double_histogram(&self, name: &str) -> Arc<dyn Histogram> {
        debug!(meter = %self.scope, name, "Creating histogram");
        Arc::new(RecorderHistogram {
            recorder: self.recorder.clone(),
            name: name.to_string(),
        })
    }
}

fn key(name: &str, attrs: &Attributes) -> Key {
    let labels: Vec<Label> = attrs
        .iter()
        .map(|(k, v)| Label::new(k.clone(), v.clone()))
        .collect();
    Key::from_parts(name.to_string(), labels)
}

/// Double counter over the integral `metrics` counter.
///
/// Whole units are forwarded as they accumulate; the fractional remainder is
/// kept per label set.
struct RecorderCounter<R> {
    recorder: Arc<R>,
    name: String,
    carry: Mutex<HashMap<Attributes, f64>>,
}

impl<R: Recorder + Send + Sync> Counter for RecorderCounter<R> {
    fn add(&self, value: f64, attrs: &Attributes) {
        // Monotonic: negative and non-finite adds are dropped
        if !value.is_finite() || value < 0.0 {
            return;
        }

        let whole = {
            let mut carry = self.carry.lock();
            let pending = carry.entry(attrs.clone()).or_insert(0.0);
            *pending += value;
            let whole = pending.trunc();
            *pending -= whole;
            whole
        };

        if whole >= 1.0 {
            self.recorder
                .register_counter(&key(&self.name, attrs), &METADATA)
                .increment(whole as u64);
        }
    }
}

struct RecorderUpDownCounter<R> {
    recorder: Arc<R>,
    name: String,
}

impl<R: Recorder + Send + Sync> UpDownCounter for RecorderUpDownCounter<R> {
    fn add(&self, value: i64, attrs: &Attributes) {
        let gauge = self.recorder.register_gauge(&key(&self.name, attrs), &METADATA);
        if value >= 0 {
            gauge.increment(value as f64);
        } else {
            gauge.decrement(value.unsigned_abs() as f64);
        }
    }
}

struct RecorderHistogram<R> {
    recorder: Arc<R>,
    name: String,
}

impl<R: Recorder + Send + Sync> Histogram for RecorderHistogram<R> {
    fn record(&self, value: f64, attrs: &Attributes, _context: &Context) {
        self.recorder
            .register_histogram(&key(&self.name, attrs), &METADATA)
            .record(value);
    }
}
