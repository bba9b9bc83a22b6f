//! Configuration types
//!
//! Every pipeline stage receives an explicit, immutable `EngineConfig`; nothing
//! reads configuration from ambient state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::{Asset, CoreError, CoreResult, RankStrategy};

/// Bounds on how many records each cycle's series keeps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_secs: u64,
    pub capacity: usize,
}

impl RetentionConfig {
    /// Upper bound accepted by `EngineConfig::validate` (100 years)
    pub const MAX_AGE_SECS_LIMIT: u64 = 100 * 365 * 24 * 3_600;

    /// `None` when the age does not fit a `chrono::Duration`
    pub fn max_age(&self) -> Option<chrono::Duration> {
        i64::try_from(self.max_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    /// Oldest timestamp kept when the newest record is at `newest`.
    /// `None` means nothing is old enough to evict.
    pub fn horizon(&self, newest: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age()
            .and_then(|age| newest.checked_sub_signed(age))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3_600,
            capacity: 1_024,
        }
    }
}

/// Live monitoring cadence and failure policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub max_consecutive_failures: u32,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based), doubling and capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.backoff_initial_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            fetch_timeout_ms: 5_000,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            max_consecutive_failures: 3,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_currency: Asset,
    /// Fee applied to quotes that do not carry their own
    pub trading_fee: f64,
    /// Minimum net profit, in percent, for a cycle to count as active
    pub min_profit_threshold: f64,
    pub max_cycle_length: usize,
    pub monitored_coins: BTreeSet<Asset>,

    pub strategy: RankStrategy,
    pub whitelist_top_n: usize,
    pub blacklist_bottom_n: usize,
    pub whitelist_min_volume: f64,

    pub retention: RetentionConfig,
    pub monitor: MonitorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_currency: Asset::from("USDT"),
            trading_fee: 0.001,
            min_profit_threshold: 0.0,
            max_cycle_length: 3,
            monitored_coins: ["BTC", "ETH", "BNB", "SOL", "XRP", "ADA"]
                .into_iter()
                .map(Asset::from)
                .collect(),
            strategy: RankStrategy::Liquidity,
            whitelist_top_n: 100,
            blacklist_bottom_n: 100,
            whitelist_min_volume: 100_000.0,
            retention: RetentionConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub const MIN_CYCLE_LENGTH: usize = 3;
    pub const MAX_CYCLE_LENGTH: usize = 8;

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_currency.as_str().is_empty() {
            return Err(CoreError::InvalidConfig("base_currency is empty".to_string()));
        }

        if !(0.0..1.0).contains(&self.trading_fee) {
            return Err(CoreError::InvalidConfig(format!(
                "trading_fee must be in [0, 1), got {}",
                self.trading_fee
            )));
        }

        if !self.min_profit_threshold.is_finite() {
            return Err(CoreError::InvalidConfig(
                "min_profit_threshold must be finite".to_string(),
            ));
        }

        if !(Self::MIN_CYCLE_LENGTH..=Self::MAX_CYCLE_LENGTH).contains(&self.max_cycle_length) {
            return Err(CoreError::InvalidConfig(format!(
                "max_cycle_length must be in {}..={}, got {}",
                Self::MIN_CYCLE_LENGTH,
                Self::MAX_CYCLE_LENGTH,
                self.max_cycle_length
            )));
        }

        if self.retention.max_age_secs > RetentionConfig::MAX_AGE_SECS_LIMIT {
            return Err(CoreError::InvalidConfig(format!(
                "retention.max_age_secs must be at most {}, got {}",
                RetentionConfig::MAX_AGE_SECS_LIMIT,
                self.retention.max_age_secs
            )));
        }

        if self.retention.capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "retention.capacity must be positive".to_string(),
            ));
        }

        if self.monitor.interval_ms == 0 || self.monitor.fetch_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "monitor interval and fetch timeout must be positive".to_string(),
            ));
        }

        if self.monitor.max_consecutive_failures == 0 {
            return Err(CoreError::InvalidConfig(
                "monitor.max_consecutive_failures must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
