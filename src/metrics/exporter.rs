//! Exporter pipeline
//!
//! Builds the Prometheus recorder behind the registry's provider and runs the
//! enabled backends: the HTTP scrape endpoint and the periodic stream writer.

use metrics::{KeyName, Recorder, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::MetricsError;
use super::instrument::MeterProvider;
use super::latency::LatencyCategory;
use super::recorder::RecorderProvider;
use crate::config::{MetricsConfig, StreamReaderOptions, StreamTarget};

/// Running exporter backends and the provider they read from.
///
/// Every background task, including the upkeep loop the Prometheus builder
/// spawns for the scrape endpoint, lives on a runtime owned by the pipeline
/// and ends when the pipeline is dropped.
pub struct ExporterPipeline {
    provider: Arc<RecorderProvider<PrometheusRecorder>>,
    handle: PrometheusHandle,
    stream_target: Option<StreamTarget>,
    runtime: Option<Runtime>,
}

impl ExporterPipeline {
    /// Build the pipeline for the enabled exporters.
    ///
    /// Returns `None` when no exporter is enabled.
    pub fn build(config: &MetricsConfig) -> Result<Option<Self>, MetricsError> {
        if !config.is_enabled() {
            return Ok(None);
        }
        config.validate_buckets().map_err(MetricsError::InvalidBuckets)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("stats-exporter")
            .enable_all()
            .build()
            .map_err(MetricsError::Runtime)?;

        let mut builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("_latency".to_string()), &config.latency_buckets)?;
        for (key, value) in &config.global_labels {
            builder = builder.add_global_label(key.clone(), value.clone());
        }

        let recorder = if config.enable_scrape_exporter {
            let bind_addr = config.scrape.bind_addr;
            // Listener binding and the builder's upkeep task need the runtime context
            let (recorder, exporter) = {
                let _guard = runtime.enter();
                builder.with_http_listener(bind_addr).build()?
            };
            runtime.spawn(async move {
                if exporter.await.is_err() {
                    error!("Scrape exporter stopped");
                }
            });
            info!(%bind_addr, "Scrape exporter listening");
            recorder
        } else {
            builder.build_recorder()
        };

        // Register latency descriptions
        for category in LatencyCategory::ALL {
            recorder.describe_histogram(
                KeyName::from(category.histogram_name()),
                Some(Unit::Microseconds),
                category.description().into(),
            );
        }

        let handle = recorder.handle();

        let stream_target = if config.enable_stream_exporter {
            runtime.spawn(stream_export_task(handle.clone(), config.stream.clone()));
            info!(
                interval_ms = config.stream.export_interval_ms,
                target = ?config.stream.target,
                "Stream exporter started"
            );
            Some(config.stream.target)
        } else {
            None
        };

        Ok(Some(Self {
            provider: Arc::new(RecorderProvider::new(recorder)),
            handle,
            stream_target,
            runtime: Some(runtime),
        }))
    }

    /// Provider to install into the registry
    pub fn provider(&self) -> Arc<dyn MeterProvider> {
        self.provider.clone()
    }

    /// Handle for rendering the current aggregated values
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Background tasks currently alive on the pipeline's runtime
    pub fn alive_tasks(&self) -> usize {
        self.runtime
            .as_ref()
            .map_or(0, |runtime| runtime.metrics().num_alive_tasks())
    }

    /// Flush the stream exporter once and stop all backends
    pub fn shutdown(self) {
        if let Some(target) = self.stream_target {
            if let Err(e) = export_snapshot(&self.handle, target) {
                warn!(error = %e, "Final stream export failed");
            }
        }
        debug!(tasks = self.alive_tasks(), "Stopping exporter tasks");
        // Drop stops the runtime
    }
}

impl Drop for ExporterPipeline {
    fn drop(&mut self) {
        // Does not block, so the pipeline may be dropped from async code
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Background task that periodically writes the rendered metrics to the stream
async fn stream_export_task(handle: PrometheusHandle, options: StreamReaderOptions) {
    let mut interval = tokio::time::interval(options.export_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        let handle = handle.clone();
        let target = options.target;
        let export = tokio::task::spawn_blocking(move || export_snapshot(&handle, target));

        match tokio::time::timeout(options.export_timeout(), export).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Stream export failed"),
            Ok(Err(e)) => warn!(error = %e, "Stream export task failed"),
            Err(_) => warn!(timeout_ms = options.export_timeout_ms, "Stream export timed out"),
        }
    }
}

fn export_snapshot(handle: &PrometheusHandle, target: StreamTarget) -> io::Result<()> {
    match target {
        StreamTarget::Stdout => write_snapshot(handle, io::stdout().lock()),
        StreamTarget::Stderr => write_snapshot(handle, io::stderr().lock()),
    }
}

/// Render the current values into `out`
pub fn write_snapshot<W: Write>(handle: &PrometheusHandle, mut out: W) -> io::Result<()> {
    handle.run_upkeep();
    let rendered = handle.render();
    out.write_all(rendered.as_bytes())?;
    out.flush()
}
