//! Tests for error types

use prometheus_scheduler::core::{LaunchError, SchedulerError};

#[test]
fn test_not_found_error() {
    let err = SchedulerError::NotFound("ns:app:daily".to_string());
    assert_eq!(format!("{}", err), "not found: ns:app:daily");
}

#[test]
fn test_transaction_conflict_error() {
    let err = SchedulerError::TransactionConflict("jobs/ns:app:daily".to_string());
    assert_eq!(format!("{}", err), "transaction conflict on jobs/ns:app:daily");
}

#[test]
fn test_retryable_classification() {
    assert!(SchedulerError::TransactionConflict("x".into()).is_retryable());
    assert!(SchedulerError::Storage("x".into()).is_retryable());
    assert!(SchedulerError::Messaging("x".into()).is_retryable());
    assert!(!SchedulerError::NotFound("x".into()).is_retryable());
    assert!(!SchedulerError::Conflict("x".into()).is_retryable());
    assert!(!SchedulerError::MalformedNotification("x".into()).is_retryable());
}

#[test]
fn test_malformed_classification() {
    assert!(SchedulerError::MalformedNotification("x".into()).is_malformed());
    assert!(!SchedulerError::Serialization("x".into()).is_malformed());
}

#[test]
fn test_serde_error_conversion() {
    let err: SchedulerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}

#[test]
fn test_launch_error_display() {
    let err = LaunchError::Duplicate("ns:app:daily#3".to_string());
    assert_eq!(format!("{}", err), "duplicate launch ns:app:daily#3");
}

#[test]
fn test_error_into_anyhow() {
    let err: anyhow::Error = SchedulerError::AlreadyExists("ns:app:daily".into()).into();
    assert!(err.to_string().contains("already exists"));
}
