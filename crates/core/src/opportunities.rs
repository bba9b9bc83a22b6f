//! Cycle identity and profitability records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Asset;

/// Canonical identity of a cycle: the ordered assets visited, starting at the base.
///
/// The closing return to the base is implicit, so `[USDT, BTC, ETH]` denotes
/// `USDT -> BTC -> ETH -> USDT`. Two traversals visiting the same assets in the
/// same order compare equal and hash equal no matter how they were found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Vec<Asset>);

impl CycleId {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self(assets)
    }

    /// Asset the cycle starts and ends at
    pub fn base(&self) -> Option<&Asset> {
        self.0.first()
    }

    pub fn assets(&self) -> &[Asset] {
        &self.0
    }

    /// Number of trades needed to go around once
    pub fn legs(&self) -> usize {
        self.0.len()
    }

    /// Consecutive (from, to) conversions, including the closing leg
    pub fn hops(&self) -> impl Iterator<Item = (&Asset, &Asset)> {
        let n = self.0.len();
        (0..n).map(move |i| (&self.0[i], &self.0[(i + 1) % n]))
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.0.contains(asset)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for asset in &self.0 {
            write!(f, "{} -> ", asset)?;
        }
        match self.0.first() {
            Some(base) => write!(f, "{}", base),
            None => Ok(()),
        }
    }
}

/// `(gain_ratio - 1) * 100`
pub fn net_profit_pct(gain_ratio: f64) -> f64 {
    (gain_ratio - 1.0) * 100.0
}

/// One profitability observation of a cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityRecord {
    pub cycle: CycleId,
    pub timestamp: DateTime<Utc>,
    pub gain_ratio: f64,
    pub net_profit_pct: f64,
}

impl ProfitabilityRecord {
    pub fn new(cycle: CycleId, gain_ratio: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle,
            timestamp,
            gain_ratio,
            net_profit_pct: net_profit_pct(gain_ratio),
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.gain_ratio > 1.0
    }
}
