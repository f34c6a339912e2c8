//! Bounded exponential backoff
//!
//! Waits grow by `factor_percent` each `advance()` until `max_single`, and
//! the timer expires once the sum of handed-out waits exceeds `max_total`.
//! All arithmetic is in whole milliseconds.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffTimer {
    initial_ms: u64,
    max_single_ms: Option<u64>,
    max_total_ms: Option<u64>,
    factor_percent: u32,
    current_ms: u64,
    total_ms: u64,
}

impl BackoffTimer {
    pub fn new(initial: Duration, max_total: Option<Duration>, factor_percent: u32) -> Self {
        let initial_ms = initial.as_millis() as u64;
        Self {
            initial_ms,
            max_single_ms: None,
            max_total_ms: max_total.map(|d| d.as_millis() as u64),
            factor_percent,
            current_ms: initial_ms,
            total_ms: 0,
        }
    }

    pub fn with_max_single(mut self, max_single: Duration) -> Self {
        let cap = max_single.as_millis() as u64;
        self.max_single_ms = Some(cap);
        self.current_ms = self.current_ms.min(cap);
        self
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max_total, config.factor_percent)
            .with_max_single(config.max_single)
    }

    /// Reset to the initial wait and forget the total
    pub fn initial(&mut self) {
        self.current_ms = match self.max_single_ms {
            Some(cap) => self.initial_ms.min(cap),
            None => self.initial_ms,
        };
        self.total_ms = 0;
    }

    pub fn advance(&mut self) {
        let grown = self
            .current_ms
            .saturating_mul(100 + self.factor_percent as u64)
            / 100;
        // Integer rounding must not stall growth at small waits
        let grown = if self.factor_percent > 0 {
            grown.max(self.current_ms + 1)
        } else {
            grown
        };
        self.current_ms = match self.max_single_ms {
            Some(cap) => grown.min(cap),
            None => grown,
        };
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Current wait, counted towards the total
    pub fn get_time_for_sleep(&mut self) -> Duration {
        self.total_ms = self.total_ms.saturating_add(self.current_ms);
        Duration::from_millis(self.current_ms)
    }

    pub fn total_waited(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }

    pub fn is_expired(&self) -> bool {
        match self.max_total_ms {
            Some(max) => self.total_ms > max,
            None => false,
        }
    }

    /// Sleep for the current wait, then advance
    pub async fn sleep(&mut self) {
        let wait = self.get_time_for_sleep();
        tokio::time::sleep(wait).await;
        self.advance();
    }
}
