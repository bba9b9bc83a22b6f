//! Liquidity metrics and the whitelist/blacklist view

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{Asset, CoreError, CoreResult};

/// Per-asset market statistics. Missing values mean "no data".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityMetrics {
    pub volume: Option<f64>,
    pub volatility: Option<f64>,
}

impl LiquidityMetrics {
    pub fn new(volume: f64, volatility: f64) -> Self {
        Self {
            volume: Some(volume),
            volatility: Some(volatility),
        }
    }
}

/// How assets are ranked when building asset lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankStrategy {
    /// Higher trading volume is more favorable
    #[default]
    Liquidity,
    /// Larger absolute price movement is more favorable
    Volatility,
}

impl RankStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RankStrategy::Liquidity => "liquidity",
            RankStrategy::Volatility => "volatility",
        }
    }

    /// Score an asset; higher is more favorable. `None` when the asset has no usable data.
    pub fn rank(&self, metrics: &LiquidityMetrics) -> Option<f64> {
        let value = match self {
            RankStrategy::Liquidity => metrics.volume,
            RankStrategy::Volatility => metrics.volatility.map(f64::abs),
        }?;
        value.is_finite().then_some(value)
    }
}

impl fmt::Display for RankStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RankStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "liquidity" => Ok(RankStrategy::Liquidity),
            "volatility" => Ok(RankStrategy::Volatility),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown strategy '{}', expected liquidity or volatility",
                other
            ))),
        }
    }
}

/// Disjoint whitelist/blacklist produced by the liquidity filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLists {
    pub strategy: RankStrategy,
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "whitelist_assets")]
    pub whitelist: BTreeSet<Asset>,
    #[serde(rename = "blacklist_assets")]
    pub blacklist: BTreeSet<Asset>,
}

impl AssetLists {
    pub fn empty(strategy: RankStrategy) -> Self {
        Self {
            strategy,
            generated_at: Utc::now(),
            whitelist: BTreeSet::new(),
            blacklist: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty()
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        let lists: Self =
            serde_json::from_str(json).map_err(|e| CoreError::SerializationError(e.to_string()))?;

        if let Some(asset) = lists.whitelist.intersection(&lists.blacklist).next() {
            return Err(CoreError::SerializationError(format!(
                "asset {} is both whitelisted and blacklisted",
                asset
            )));
        }

        Ok(lists)
    }
}
