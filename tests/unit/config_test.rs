//! Tests for configuration validation

use prometheus_scheduler::config::{
    BusBackendConfig, RetryConfig, SchedulerConfig, StoreBackendConfig, SubscriberConfig, TopicConfig,
};
use prometheus_scheduler::util::{Backoff, RetryPolicy, DEFAULT_LOG_FILTER};
use std::time::Duration;

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.topics.time, "timeevent");
    assert_eq!(cfg.topics.data, "dataevent");
    assert_eq!(cfg.topics.program_status, "programstatusevent");
    assert_eq!(cfg.topics.program_status_trigger, "programstatustrigger");
}

#[test]
fn test_subscriber_config_invalid_batch_size() {
    let invalid = SubscriberConfig {
        batch_size: 0,
        ..SubscriberConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_topic_config_rejects_shared_status_topic() {
    let invalid = TopicConfig {
        program_status_trigger: "programstatusevent".into(),
        ..TopicConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_retry_config_invalid_attempts() {
    let invalid = RetryConfig {
        max_attempts: 0,
        ..RetryConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_retry_config_into_policy() {
    let cfg = RetryConfig {
        max_attempts: 4,
        delay_ms: 10,
        backoff: Backoff::Exponential { max_delay_ms: 25 },
    };
    let policy = RetryPolicy::from(&cfg);
    assert_eq!(policy.max_attempts(), 4);
    assert_eq!(policy.delay_for(1), Duration::from_millis(10));
    assert_eq!(policy.delay_for(2), Duration::from_millis(20));
    assert_eq!(policy.delay_for(3), Duration::from_millis(25));
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "consumer_name": "sched-a",
        "subscriber": { "batch_size": 10 },
        "store": { "kind": "file", "path": "/var/lib/scheduler/store" },
        "bus": { "kind": "in_memory" },
        "time_events": { "enabled": false }
    }"#;
    let cfg = SchedulerConfig::from_json_str(json).expect("valid config");
    assert_eq!(cfg.consumer_name, "sched-a");
    assert_eq!(cfg.subscriber.batch_size, 10);
    assert_eq!(cfg.subscriber.poll_interval_ms, SubscriberConfig::default().poll_interval_ms);
    assert_eq!(
        cfg.store,
        StoreBackendConfig::File {
            path: "/var/lib/scheduler/store".into()
        }
    );
    assert_eq!(cfg.bus, BusBackendConfig::InMemory);
    assert!(!cfg.time_events.enabled);
}

#[test]
fn test_logging_config_defaults_and_overrides() {
    let cfg = SchedulerConfig::from_json_str(r#"{ "logging": { "filter": "prometheus_scheduler=debug" } }"#)
        .expect("valid config");
    assert_eq!(cfg.logging.filter, "prometheus_scheduler=debug");
    assert!(cfg.logging.with_target);
    assert!(!cfg.logging.ansi);
    assert_eq!(SchedulerConfig::default().logging.filter, DEFAULT_LOG_FILTER);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "consumer_name": "" }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}
