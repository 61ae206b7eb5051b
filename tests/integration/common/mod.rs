//! Recording meter provider shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use stats_meter::metrics::{
    Attributes, Context, Counter, Histogram, Meter, MeterProvider, MeterScope, UpDownCounter,
};

/// Instrument kinds as seen by the fake meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Counter,
    UpDownCounter,
    Histogram,
}

/// One histogram sample
#[derive(Debug, Clone)]
pub struct Sample {
    pub histogram: String,
    pub value: f64,
    pub attrs: Attributes,
    pub context: Context,
}

/// Everything the fake backend observed
#[derive(Default)]
pub struct Recorded {
    pub created: Mutex<Vec<(Kind, String)>>,
    pub counters: Mutex<HashMap<String, f64>>,
    pub up_down_counters: Mutex<HashMap<String, i64>>,
    pub samples: Mutex<Vec<Sample>>,
}

impl Recorded {
    pub fn creations(&self, kind: Kind, name: &str) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|(k, n)| *k == kind && n == name)
            .count()
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.lock().get(name).copied()
    }

    pub fn up_down_counter(&self, name: &str) -> Option<i64> {
        self.up_down_counters.lock().get(name).copied()
    }

    pub fn samples_for(&self, histogram: &str) -> Vec<Sample> {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.histogram == histogram)
            .cloned()
            .collect()
    }
}

/// Provider handing out instruments that write into a shared [`Recorded`]
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub recorded: Arc<Recorded>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeterProvider for FakeProvider {
    fn meter(&self, _scope: &MeterScope) -> Arc<dyn Meter> {
        Arc::new(FakeMeter {
            recorded: self.recorded.clone(),
        })
    }
}

struct FakeMeter {
    recorded: Arc<Recorded>,
}

struct FakeInstrument {
    name: String,
    recorded: Arc<Recorded>,
}

impl FakeMeter {
    fn create(&self, kind: Kind, name: &str) -> Arc<FakeInstrument> {
        self.recorded.created.lock().push((kind, name.to_string()));
        Arc::new(FakeInstrument {
            name: name.to_string(),
            recorded: self.recorded.clone(),
        })
    }
}

impl Meter for FakeMeter {
    fn create_double_counter(&self, name: &str) -> Arc<dyn Counter> {
        self.create(Kind::Counter, name)
    }

    fn create_i64_up_down_counter(&self, name: &str) -> Arc<dyn UpDownCounter> {
        self.create(Kind::UpDownCounter, name)
    }

    fn create_double_histogram(&self, name: &str) -> Arc<dyn Histogram> {
        self.create(Kind::Histogram, name)
    }
}

impl Counter for FakeInstrument {
    fn add(&self, value: f64, _attrs: &Attributes) {
        *self.recorded.counters.lock().entry(self.name.clone()).or_insert(0.0) += value;
    }
}

impl UpDownCounter for FakeInstrument {
    fn add(&self, value: i64, _attrs: &Attributes) {
        *self.recorded.up_down_counters.lock().entry(self.name.clone()).or_insert(0) += value;
    }
}

impl Histogram for FakeInstrument {
    fn record(&self, value: f64, attrs: &Attributes, context: &Context) {
        self.recorded.samples.lock().push(Sample {
            histogram: self.name.clone(),
            value,
            attrs: attrs.clone(),
            context: context.clone(),
        });
    }
}

/// Registry with a fresh fake provider installed
pub fn installed_registry() -> (stats_meter::Registry, Arc<Recorded>) {
    let registry = stats_meter::Registry::new();
    let provider = FakeProvider::new();
    let recorded = provider.recorded.clone();
    registry.install_provider(Arc::new(provider));
    (registry, recorded)
}
