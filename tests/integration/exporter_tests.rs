//! Exporter pipeline integration tests

use std::net::SocketAddr;

use stats_meter::config::{MetricsConfig, ScrapeExporterOptions};
use stats_meter::{MetricsError, Registry};

fn stream_config() -> MetricsConfig {
    MetricsConfig {
        enable_stream_exporter: true,
        ..MetricsConfig::default()
    }
}

fn scrape_config() -> MetricsConfig {
    MetricsConfig {
        enable_scrape_exporter: true,
        scrape: ScrapeExporterOptions {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        },
        ..MetricsConfig::default()
    }
}

/// Values written through the registry show up in the rendered output
#[tokio::test]
async fn test_stream_exporter_end_to_end() {
    let registry = Registry::new();
    registry.init(&stream_config()).unwrap();
    assert!(registry.is_recording());

    registry.add_counter("logins_total", 2.0);
    registry.add_counter("logins_total", 1.0);
    registry.add_up_down_counter("players_online", 3);
    {
        let _timer = registry.task_latency("saveWorld");
    }

    let output = registry.render().unwrap();
    assert!(output.contains("logins_total 3"), "{output}");
    assert!(output.contains("players_online"), "{output}");
    assert!(output.contains("# TYPE task_latency histogram"), "{output}");
    assert!(output.contains("task=\"saveWorld\""), "{output}");

    registry.shutdown();
    assert!(registry.render().is_none());
}

#[tokio::test]
async fn test_scrape_exporter_starts() {
    let registry = Registry::new();
    registry.init(&scrape_config()).unwrap();

    registry.add_counter("requests_total", 1.0);
    let output = registry.render().unwrap();
    assert!(output.contains("requests_total 1"), "{output}");

    registry.shutdown();
}

#[tokio::test]
async fn test_both_exporters() {
    let mut config = scrape_config();
    config.enable_stream_exporter = true;
    config
        .global_labels
        .insert("world".to_string(), "canary".to_string());

    let registry = Registry::new();
    registry.init(&config).unwrap();
    registry.add_counter("kills_total", 1.0);

    let output = registry.render().unwrap();
    assert!(output.contains("world=\"canary\""), "{output}");

    registry.shutdown();
}

/// A second init replaces the pipeline and starts from fresh instruments
#[tokio::test]
async fn test_reinit_replaces_pipeline() {
    let registry = Registry::new();
    registry.init(&stream_config()).unwrap();
    registry.add_counter("before_total", 1.0);

    registry.init(&stream_config()).unwrap();
    registry.add_counter("after_total", 1.0);

    let output = registry.render().unwrap();
    assert!(!output.contains("before_total"), "{output}");
    assert!(output.contains("after_total 1"), "{output}");
    assert_eq!(registry.latency_histogram_names().len(), 5);

    registry.shutdown();
}

#[tokio::test]
async fn test_init_after_shutdown_fails() {
    let registry = Registry::new();
    registry.shutdown();

    let result = registry.init(&stream_config());
    assert!(matches!(result, Err(MetricsError::ShutDown)));
}

/// Exporters bring their own runtime, so boot code need not be async
#[test]
fn test_init_outside_runtime() {
    let registry = Registry::new();
    registry.init(&scrape_config()).unwrap();
    assert!(registry.is_recording());

    registry.add_counter("boots_total", 1.0);
    let output = registry.render().unwrap();
    assert!(output.contains("boots_total 1"), "{output}");

    registry.shutdown();
}

/// Replaced and shut down pipelines leave nothing running on the caller's runtime
#[tokio::test]
async fn test_reinit_leaves_no_tasks_behind() {
    let runtime = tokio::runtime::Handle::current();
    let before = runtime.metrics().num_alive_tasks();

    let registry = Registry::new();
    registry.init(&scrape_config()).unwrap();
    registry.init(&scrape_config()).unwrap();
    registry.shutdown();

    assert_eq!(runtime.metrics().num_alive_tasks(), before);
}

/// Re-init with every exporter off detaches the running pipeline
#[tokio::test]
async fn test_reinit_without_exporters_disables() {
    let registry = Registry::new();
    registry.init(&stream_config()).unwrap();
    registry.add_counter("before_total", 1.0);

    registry.init(&MetricsConfig::default()).unwrap();

    assert!(!registry.is_recording());
    assert!(!registry.is_shut_down());
    assert!(registry.render().is_none());
    assert!(registry.latency_histogram_names().is_empty());
    registry.add_counter("after_total", 1.0);

    // Exporters can be turned back on later
    registry.init(&stream_config()).unwrap();
    let output = registry.render().unwrap();
    assert!(!output.contains("before_total"), "{output}");

    registry.shutdown();
}

/// With no exporter enabled the registry stays disabled without a runtime
#[test]
fn test_disabled_config() {
    let registry = Registry::new();
    registry.init(&MetricsConfig::default()).unwrap();

    registry.add_counter("x", 1.0);
    assert!(!registry.is_recording());
    assert!(registry.render().is_none());
}
