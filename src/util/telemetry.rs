//! Log subscriber setup for scheduler processes.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Filter used when neither `RUST_LOG` nor the configuration names a usable one.
///
/// Scheduler modules log at INFO; per-batch subscriber and store traffic stays at
/// DEBUG and TRACE, so it is off unless asked for.
pub const DEFAULT_LOG_FILTER: &str = "warn,prometheus_scheduler=info";

fn filter_for(config: &LoggingConfig) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(&config.filter) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(DEFAULT_LOG_FILTER), Some(e.to_string())),
    }
}

/// Install the fmt subscriber described by `config` unless a subscriber is already set.
///
/// `RUST_LOG` takes precedence over `config.filter`. An unparsable filter falls back to
/// [`DEFAULT_LOG_FILTER`] and is reported once the subscriber is up. Returns whether
/// this call installed the subscriber.
pub fn init_logging(config: &LoggingConfig) -> bool {
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    let (filter, rejected) = filter_for(config);
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok();
    if let Some(e) = rejected {
        tracing::warn!("invalid log filter {:?}, using {}: {}", config.filter, DEFAULT_LOG_FILTER, e);
    }
    installed
}

/// [`init_logging`] with `default_directive` as the configured filter.
pub fn init_tracing(default_directive: &str) -> bool {
    init_logging(&LoggingConfig {
        filter: default_directive.to_string(),
        ..LoggingConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_filter_falls_back_to_default() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            filter: "prometheus_scheduler=[".into(),
            ..LoggingConfig::default()
        };
        let (filter, rejected) = filter_for(&config);
        assert!(rejected.is_some());
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());

        let (_, rejected) = filter_for(&LoggingConfig::default());
        assert_eq!(rejected, None);
    }
}
