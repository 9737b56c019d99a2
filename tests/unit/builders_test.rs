//! Tests for builder modules

use prometheus_scheduler::builders::RuntimeBuilder;
use prometheus_scheduler::config::{ControllerConfig, RuntimeConfig};
use prometheus_scheduler::core::{DiagnosticsSink, InMemorySink};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_builder_applies_thread_bounds() {
    let runtime = RuntimeBuilder::new()
        .core_threads(1)
        .max_threads(2)
        .build()
        .unwrap();
    assert_eq!(runtime.config().executor.core_threads, 1);
    assert_eq!(runtime.config().executor.max_threads, 2);
    assert_eq!(runtime.executor().thread_count(), 1);
    assert!(runtime.controller().is_some());
    assert!(runtime.stats().is_none());

    runtime.shutdown();
    assert!(runtime.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_builder_without_controller() {
    let config = RuntimeConfig {
        controller: ControllerConfig {
            enabled: false,
            tick_ms: 40,
        },
        ..RuntimeConfig::default()
    };
    let runtime = RuntimeBuilder::with_config(config).build().unwrap();
    assert!(runtime.controller().is_none());
}

#[test]
fn test_builder_with_diagnostics() {
    let sink = Arc::new(InMemorySink::new(4));
    let runtime = RuntimeBuilder::new()
        .diagnostics(Arc::clone(&sink) as Arc<dyn DiagnosticsSink>)
        .build()
        .unwrap();
    let stats = runtime.stats().unwrap();
    let snapshot = stats.report_now();
    assert_eq!(snapshot.queue, runtime.queue().name());
    assert_eq!(sink.snapshots().len(), 1);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = RuntimeBuilder::new()
        .core_threads(4)
        .max_threads(1)
        .build()
        .unwrap_err();
    assert!(format!("{err:#}").contains("runtime config invalid"));
}
