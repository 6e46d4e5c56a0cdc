//! Tests for utility functions

use prometheus_scheduler::core::SchedulerError;
use prometheus_scheduler::util::{datetime_from_ms, init_tracing, now_ms, RetryPolicy};
use std::cell::Cell;
use std::time::Duration;

#[test]
fn test_now_ms_round_trips_through_chrono() {
    let now = now_ms();
    let dt = datetime_from_ms(now).expect("in range");
    assert_eq!(dt.timestamp_millis(), now);
}

#[test]
fn test_retry_stops_on_success() {
    let calls = Cell::new(0);
    let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
    let value = policy
        .retry("flaky", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SchedulerError::Storage("busy".into()))
            } else {
                Ok(42)
            }
        })
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_retry_gives_up_after_max_attempts() {
    let calls = Cell::new(0);
    let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
    let err = policy
        .retry("always_busy", || -> Result<(), SchedulerError> {
            calls.set(calls.get() + 1);
            Err(SchedulerError::TransactionConflict("jobs".into()))
        })
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TransactionConflict(_)));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_retry_skips_permanent_errors() {
    let calls = Cell::new(0);
    let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
    let _ = policy.retry("missing", || -> Result<(), SchedulerError> {
        calls.set(calls.get() + 1);
        Err(SchedulerError::NotFound("ns:app:x".into()))
    });
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing("prometheus_scheduler=debug");
    assert!(!init_tracing("prometheus_scheduler=debug"));
}
