//! Tests for error types

use prometheus_scheduler::core::{JobError, SchedulerError};
use std::error::Error;

#[test]
fn test_queue_shutdown_error() {
    let err = SchedulerError::QueueShutdown("timer".to_string());
    assert_eq!(format!("{}", err), "timeout queue `timer` is shut down");
}

#[test]
fn test_pool_shutdown_error() {
    let err = SchedulerError::PoolShutdown("worker".to_string());
    assert_eq!(format!("{}", err), "executor `worker` is shut down");
}

#[test]
fn test_spawn_error_keeps_source() {
    let err = SchedulerError::Spawn {
        name: "worker-3".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no stack"),
    };
    assert_eq!(
        format!("{}", err),
        "failed to spawn thread `worker-3`: no stack"
    );
    assert!(err.source().is_some());
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("tick_ms must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: tick_ms must be greater than 0"
    );
}

#[test]
fn test_wait_errors() {
    assert_eq!(format!("{}", SchedulerError::Timeout), "operation timed out");
    assert_eq!(
        format!("{}", SchedulerError::Disconnected),
        "result channel disconnected"
    );
    assert_eq!(
        format!("{}", SchedulerError::Panicked("oops".into())),
        "job panicked: oops"
    );
}

#[test]
fn test_job_error_variants() {
    assert_eq!(format!("{}", JobError::Interrupted), "worker interrupted");

    let failed = JobError::failed(std::io::Error::other("disk full"));
    assert!(matches!(failed, JobError::Failed(_)));
    assert_eq!(format!("{}", failed), "disk full");

    let from_anyhow: JobError = anyhow::anyhow!("bad row").into();
    assert_eq!(format!("{}", from_anyhow), "bad row");
}

#[test]
fn test_scheduler_error_into_anyhow() {
    let err: anyhow::Error = SchedulerError::Timeout.into();
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}
