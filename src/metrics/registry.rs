//! Metrics registry
//!
//! Owns the installed meter provider and the instrument caches. Ad hoc
//! counters are created on first use under a single mutex; the latency
//! histograms are created once at init and read lock-free by timers.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::MetricsError;
use super::exporter::ExporterPipeline;
use super::instrument::{
    Attributes, Context, Counter, Histogram, Meter, MeterProvider, MeterScope, UpDownCounter,
};
use super::latency::{LatencyCategory, ScopedLatency};
use crate::config::MetricsConfig;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Process-wide registry
pub fn global() -> &'static Registry {
    &GLOBAL
}

#[derive(Default)]
struct AdHocInstruments {
    counters: HashMap<String, Arc<dyn Counter>>,
    up_down_counters: HashMap<String, Arc<dyn UpDownCounter>>,
}

/// Metrics registry
///
/// Inert until a provider is installed, either by [`Registry::init`] or
/// [`Registry::install_provider`]. Every write is a silent no-op while inert,
/// and again for good after [`Registry::shutdown`].
pub struct Registry {
    scope: MeterScope,
    provider: RwLock<Option<Arc<dyn MeterProvider>>>,
    /// Guards lookup-or-create-then-write of ad hoc counters
    instruments: Mutex<AdHocInstruments>,
    /// Fixed key set after `init_histograms`
    latency_histograms: DashMap<String, Arc<dyn Histogram>>,
    pipeline: Mutex<Option<ExporterPipeline>>,
    default_context: Context,
    /// Mirrors `provider.is_some()`, written under the provider write lock
    installed: AtomicBool,
    shut_down: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an inert registry with the default meter identity
    pub fn new() -> Self {
        Self::with_scope(MeterScope::default())
    }

    pub fn with_scope(scope: MeterScope) -> Self {
        Self {
            scope,
            provider: RwLock::new(None),
            instruments: Mutex::new(AdHocInstruments::default()),
            latency_histograms: DashMap::with_capacity(LatencyCategory::ALL.len()),
            pipeline: Mutex::new(None),
            default_context: Context::new(),
            installed: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Build the configured exporters and install their provider.
    ///
    /// Meant to be called once at boot. A second call replaces the provider
    /// and drops every cached instrument; with no exporter enabled it detaches
    /// the current one and leaves the registry inert.
    pub fn init(&self, config: &MetricsConfig) -> Result<(), MetricsError> {
        if self.is_shut_down() {
            return Err(MetricsError::ShutDown);
        }

        let Some(pipeline) = ExporterPipeline::build(config)? else {
            self.detach();
            info!("No metrics exporter enabled, metrics disabled");
            return Ok(());
        };

        self.install_provider(pipeline.provider());
        self.store_pipeline(pipeline)?;

        info!(
            meter = %self.scope.name,
            version = %self.scope.version,
            scrape = config.enable_scrape_exporter,
            stream = config.enable_stream_exporter,
            "Metrics initialized"
        );
        Ok(())
    }

    /// Install a meter provider directly and seed the latency histograms
    pub fn install_provider(&self, provider: Arc<dyn MeterProvider>) {
        let previous = {
            let mut slot = self.provider.write();
            if self.is_shut_down() {
                warn!("Ignoring meter provider installed after shutdown");
                return;
            }
            self.installed.store(true, Ordering::Release);
            slot.replace(provider)
        };

        if previous.is_some() {
            warn!("Meter provider replaced, dropping cached instruments");
            self.clear_caches();
        }

        self.init_histograms();
    }

    /// Create the five category histograms if absent
    pub fn init_histograms(&self) {
        let Some(meter) = self.meter() else {
            debug!("No meter available, skipping latency histograms");
            return;
        };

        for category in LatencyCategory::ALL {
            let name = category.histogram_name();
            self.latency_histograms
                .entry(name.to_string())
                .or_insert_with(|| meter.create_double_histogram(name));
        }
    }

    /// Detach the provider and stop the exporters. The registry stays inert afterwards.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.take_provider();
        self.clear_caches();

        let pipeline = self.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            pipeline.shutdown();
        }

        info!(meter = %self.scope.name, "Metrics shut down");
    }

    /// Drop the provider and pipeline without closing the registry for good
    fn detach(&self) {
        let previous = self.take_provider();
        let pipeline = self.pipeline.lock().take();

        if previous.is_some() || pipeline.is_some() {
            warn!("Metrics re-initialized without exporters, detaching meter provider");
            self.clear_caches();
        }
        if let Some(pipeline) = pipeline {
            pipeline.shutdown();
        }
    }

    fn take_provider(&self) -> Option<Arc<dyn MeterProvider>> {
        let mut slot = self.provider.write();
        self.installed.store(false, Ordering::Release);
        slot.take()
    }

    /// Keep `pipeline` unless shutdown won the race, in which case it is stopped
    fn store_pipeline(&self, pipeline: ExporterPipeline) -> Result<(), MetricsError> {
        let mut slot = self.pipeline.lock();
        // `shutdown` raises the flag before it empties the slot
        if self.is_shut_down() {
            drop(slot);
            pipeline.shutdown();
            return Err(MetricsError::ShutDown);
        }

        let previous = slot.replace(pipeline);
        drop(slot);

        if let Some(previous) = previous {
            warn!("Metrics initialized twice, replacing exporter pipeline");
            previous.shutdown();
        }
        Ok(())
    }

    /// Current meter, if a provider is installed
    pub fn meter(&self) -> Option<Arc<dyn Meter>> {
        let provider = self.provider.read().clone()?;
        Some(provider.meter(&self.scope))
    }

    /// Whether writes currently reach a provider
    pub fn is_recording(&self) -> bool {
        self.installed.load(Ordering::Acquire) && !self.is_shut_down()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn scope(&self) -> &MeterScope {
        &self.scope
    }

    pub fn default_context(&self) -> Context {
        self.default_context.clone()
    }

    /// Current aggregated values in Prometheus text format, if exporters run
    pub fn render(&self) -> Option<String> {
        let pipeline = self.pipeline.lock();
        let handle = pipeline.as_ref()?.handle();
        handle.run_upkeep();
        Some(handle.render())
    }

    /// Names of the registered latency histograms
    pub fn latency_histogram_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .latency_histograms
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Look up a latency histogram without touching the counter lock
    pub fn latency_histogram(&self, name: &str) -> Option<Arc<dyn Histogram>> {
        self.latency_histograms.get(name).map(|entry| entry.value().clone())
    }

    // Ad hoc counters

    /// Add `value` to the counter `name`, creating it on first use
    pub fn add_counter(&self, name: &str, value: f64) {
        self.add_counter_with(name, value, &Attributes::new());
    }

    pub fn add_counter_with(&self, name: &str, value: f64, attrs: &Attributes) {
        let mut instruments = self.instruments.lock();
        if self.is_shut_down() {
            return;
        }

        if !instruments.counters.contains_key(name) {
            let Some(meter) = self.meter() else {
                return;
            };
            instruments
                .counters
                .insert(name.to_string(), meter.create_double_counter(name));
        }

        if let Some(counter) = instruments.counters.get(name) {
            counter.add(value, attrs);
        }
    }

    /// Add a signed delta to the up-down counter `name`, creating it on first use
    pub fn add_up_down_counter(&self, name: &str, value: i64) {
        self.add_up_down_counter_with(name, value, &Attributes::new());
    }

    pub fn add_up_down_counter_with(&self, name: &str, value: i64, attrs: &Attributes) {
        let mut instruments = self.instruments.lock();
        if self.is_shut_down() {
            return;
        }

        if !instruments.up_down_counters.contains_key(name) {
            let Some(meter) = self.meter() else {
                return;
            };
            instruments
                .up_down_counters
                .insert(name.to_string(), meter.create_i64_up_down_counter(name));
        }

        if let Some(counter) = instruments.up_down_counters.get(name) {
            counter.add(value, attrs);
        }
    }

    // Latency timers

    /// Start a timer in `category` labelled with `name`
    pub fn latency(&self, category: LatencyCategory, name: &str) -> ScopedLatency<'_> {
        ScopedLatency::for_category(self, category, name)
    }

    pub fn method_latency(&self, name: &str) -> ScopedLatency<'_> {
        self.latency(LatencyCategory::Method, name)
    }

    pub fn script_latency(&self, name: &str) -> ScopedLatency<'_> {
        self.latency(LatencyCategory::Script, name)
    }

    pub fn query_latency(&self, name: &str) -> ScopedLatency<'_> {
        self.latency(LatencyCategory::Query, name)
    }

    pub fn task_latency(&self, name: &str) -> ScopedLatency<'_> {
        self.latency(LatencyCategory::Task, name)
    }

    pub fn lock_latency(&self, name: &str) -> ScopedLatency<'_> {
        self.latency(LatencyCategory::Lock, name)
    }

    /// Run `f` under a timer; the sample is recorded even if `f` unwinds
    pub fn measure<T>(&self, category: LatencyCategory, name: &str, f: impl FnOnce() -> T) -> T {
        let _timer = self.latency(category, name);
        f()
    }

    fn clear_caches(&self) {
        {
            let mut instruments = self.instruments.lock();
            instruments.counters.clear();
            instruments.up_down_counters.clear();
        }
        self.latency_histograms.clear();
    }
}
