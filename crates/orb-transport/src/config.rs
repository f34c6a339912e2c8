//! Transport configuration
//!
//! Every field has a default; `TransportConfig::from_env` overrides them from
//! `ORB_*` environment variables.

use crate::connection::ReadStrategy;
use crate::error::{Result, TransportError};
use std::time::Duration;

/// Backoff settings shared by every retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max_single: Duration,
    /// `None` means retries are never cut off by total elapsed time
    pub max_total: Option<Duration>,
    pub factor_percent: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(20),
            max_single: Duration::from_millis(5000),
            max_total: Some(Duration::from_millis(30_000)),
            factor_percent: 20,
        }
    }
}

/// Per-acceptor behavior
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptorConfig {
    /// Defer binding until first use
    pub lazy: bool,
    /// Accept and cache connections but never read from them
    pub accept_only: bool,
    /// Run a dedicated accept loop instead of registering with the multiplexer
    pub blocking_accept: bool,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub backoff: BackoffConfig,
    pub idle_timeout: Duration,
    pub max_reclaim_per_pass: usize,
    pub reclaim_interval: Duration,
    pub fragment_size: usize,
    pub max_message_size: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub worker_threads: usize,
    pub multiplexer_count: usize,
    pub max_redirect_hops: usize,
    pub read_strategy: ReadStrategy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            idle_timeout: Duration::from_secs(120),
            max_reclaim_per_pass: 16,
            reclaim_interval: Duration::from_millis(10_000),
            fragment_size: 1024,
            max_message_size: giop::DEFAULT_MAX_MESSAGE_SIZE,
            request_timeout: Duration::from_millis(60_000),
            connect_timeout: Duration::from_millis(5000),
            worker_threads: 16,
            multiplexer_count: 1,
            max_redirect_hops: 10,
            read_strategy: ReadStrategy::Multiplexed,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "ORB_BACKOFF_INITIAL_MS")? {
            config.backoff.initial = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "ORB_BACKOFF_MAX_SINGLE_MS")? {
            config.backoff.max_single = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<i64>(&lookup, "ORB_BACKOFF_MAX_TOTAL_MS")? {
            config.backoff.max_total = u64::try_from(ms).ok().map(Duration::from_millis);
        }
        if let Some(pct) = parse::<u32>(&lookup, "ORB_BACKOFF_FACTOR_PERCENT")? {
            config.backoff.factor_percent = pct;
        }
        if let Some(secs) = parse::<u64>(&lookup, "ORB_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_RECLAIM_BATCH")? {
            config.max_reclaim_per_pass = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, "ORB_RECLAIM_INTERVAL_MS")? {
            config.reclaim_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_FRAGMENT_SIZE")? {
            config.fragment_size = n;
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_MAX_MESSAGE_SIZE")? {
            config.max_message_size = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, "ORB_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "ORB_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_WORKER_THREADS")? {
            config.worker_threads = n;
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_MULTIPLEXERS")? {
            config.multiplexer_count = n;
        }
        if let Some(n) = parse::<usize>(&lookup, "ORB_MAX_REDIRECT_HOPS")? {
            config.max_redirect_hops = n;
        }
        if let Some(strategy) = parse::<ReadStrategy>(&lookup, "ORB_READ_STRATEGY")? {
            config.read_strategy = strategy;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fragment_size < giop::MIN_FRAGMENT_SIZE {
            return Err(TransportError::Config(format!(
                "fragment size {} is below the minimum of {}",
                self.fragment_size,
                giop::MIN_FRAGMENT_SIZE
            )));
        }
        if self.worker_threads == 0 {
            return Err(TransportError::Config("worker_threads must be at least 1".into()));
        }
        if self.multiplexer_count == 0 {
            return Err(TransportError::Config("multiplexer_count must be at least 1".into()));
        }
        if self.backoff.initial.is_zero() {
            return Err(TransportError::Config("backoff initial wait must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TransportError::Config(format!("{}={:?} is not a valid value", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.backoff, BackoffConfig::default());
        assert_eq!(config.fragment_size, 1024);
        assert_eq!(config.max_redirect_hops, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let config = TransportConfig::from_lookup(lookup_from(&[
            ("ORB_BACKOFF_INITIAL_MS", "5"),
            ("ORB_BACKOFF_MAX_TOTAL_MS", "-1"),
            ("ORB_FRAGMENT_SIZE", "256"),
            ("ORB_IDLE_TIMEOUT_SECS", "3"),
            ("ORB_READ_STRATEGY", "dedicated"),
        ]))
        .unwrap();
        assert_eq!(config.backoff.initial, Duration::from_millis(5));
        assert_eq!(config.backoff.max_total, None);
        assert_eq!(config.fragment_size, 256);
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
        assert_eq!(config.read_strategy, ReadStrategy::Dedicated);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            TransportConfig::from_lookup(lookup_from(&[("ORB_WORKER_THREADS", "many")])),
            Err(TransportError::Config(_))
        ));
        assert!(matches!(
            TransportConfig::from_lookup(lookup_from(&[("ORB_FRAGMENT_SIZE", "8")])),
            Err(TransportError::Config(_))
        ));
    }
}
