//! Liquidity filter: ranks assets and splits them into whitelist/blacklist

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use tracing::{debug, info};

use arb_core::{Asset, AssetLists, EngineConfig, LiquidityMetrics, RankStrategy};

/// Source of per-asset liquidity metrics. Unknown assets yield `None`.
pub trait MetricsSource {
    fn metrics_for(&self, asset: &Asset) -> Option<LiquidityMetrics>;
}

impl MetricsSource for HashMap<Asset, LiquidityMetrics> {
    fn metrics_for(&self, asset: &Asset) -> Option<LiquidityMetrics> {
        self.get(asset).copied()
    }
}

impl MetricsSource for BTreeMap<Asset, LiquidityMetrics> {
    fn metrics_for(&self, asset: &Asset) -> Option<LiquidityMetrics> {
        self.get(asset).copied()
    }
}

/// Classifies assets by one ranking strategy, selected at construction
#[derive(Debug, Clone)]
pub struct LiquidityFilter {
    strategy: RankStrategy,
    top_n: usize,
    bottom_n: usize,
    min_volume: Option<f64>,
}

impl LiquidityFilter {
    pub fn new(strategy: RankStrategy, top_n: usize, bottom_n: usize) -> Self {
        Self {
            strategy,
            top_n,
            bottom_n,
            min_volume: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let filter = Self::new(config.strategy, config.whitelist_top_n, config.blacklist_bottom_n);
        match config.strategy {
            RankStrategy::Liquidity => filter.with_min_volume(config.whitelist_min_volume),
            RankStrategy::Volatility => filter,
        }
    }

    /// Assets trading below this volume are never whitelisted
    pub fn with_min_volume(mut self, min_volume: f64) -> Self {
        self.min_volume = Some(min_volume);
        self
    }

    pub fn strategy(&self) -> RankStrategy {
        self.strategy
    }

    /// Build disjoint whitelist (top-N) and blacklist (bottom-N of the rest).
    ///
    /// Candidates without a usable metric for the strategy land in neither list.
    /// Ties are broken by asset identifier ascending.
    pub fn classify<'a, I, M>(&self, candidates: I, source: &M) -> AssetLists
    where
        I: IntoIterator<Item = &'a Asset>,
        M: MetricsSource + ?Sized,
    {
        let mut scored: Vec<(Asset, f64, LiquidityMetrics)> = Vec::new();
        let mut unranked = 0usize;

        let unique: BTreeSet<&Asset> = candidates.into_iter().collect();
        for asset in unique {
            let Some(metrics) = source.metrics_for(asset) else {
                unranked += 1;
                continue;
            };
            match self.strategy.rank(&metrics) {
                Some(score) => scored.push((asset.clone(), score, metrics)),
                None => unranked += 1,
            }
        }

        // Most favorable first
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let whitelist: BTreeSet<Asset> = scored
            .iter()
            .filter(|(_, _, metrics)| self.meets_volume_floor(metrics))
            .take(self.top_n)
            .map(|(asset, _, _)| asset.clone())
            .collect();

        let mut rest: Vec<&(Asset, f64, LiquidityMetrics)> = scored
            .iter()
            .filter(|(asset, _, _)| !whitelist.contains(asset))
            .collect();
        // Least favorable first
        rest.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let blacklist: BTreeSet<Asset> = rest
            .into_iter()
            .take(self.bottom_n)
            .map(|(asset, _, _)| asset.clone())
            .collect();

        debug!(
            "Ranked {} assets by {}, {} without data",
            scored.len(),
            self.strategy,
            unranked
        );
        info!(
            "Asset lists generated ({}): {} whitelisted, {} blacklisted",
            self.strategy,
            whitelist.len(),
            blacklist.len()
        );

        AssetLists {
            strategy: self.strategy,
            generated_at: Utc::now(),
            whitelist,
            blacklist,
        }
    }

    fn meets_volume_floor(&self, metrics: &LiquidityMetrics) -> bool {
        match self.min_volume {
            Some(floor) => metrics.volume.map_or(false, |v| v >= floor),
            None => true,
        }
    }
}

/// Vertex filter handed to the graph builder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllowedAssets {
    /// Empty means "no filter"
    allowed: BTreeSet<Asset>,
    blocked: BTreeSet<Asset>,
}

impl AllowedAssets {
    pub fn new(allowed: BTreeSet<Asset>, blocked: BTreeSet<Asset>) -> Self {
        Self { allowed, blocked }
    }

    /// Admit every asset
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Monitored coins plus the whitelist, minus the blacklist.
    /// The base currency is always admitted and never blocked.
    pub fn resolve(config: &EngineConfig, lists: Option<&AssetLists>) -> Self {
        let mut allowed = config.monitored_coins.clone();
        if let Some(lists) = lists {
            allowed.extend(lists.whitelist.iter().cloned());
        }
        if !allowed.is_empty() {
            allowed.insert(config.base_currency.clone());
        }

        let mut blocked = lists.map(|l| l.blacklist.clone()).unwrap_or_default();
        blocked.remove(&config.base_currency);

        Self { allowed, blocked }
    }

    pub fn permits(&self, asset: &Asset) -> bool {
        (self.allowed.is_empty() || self.allowed.contains(asset)) && !self.blocked.contains(asset)
    }

    pub fn allowed(&self) -> &BTreeSet<Asset> {
        &self.allowed
    }

    pub fn blocked(&self) -> &BTreeSet<Asset> {
        &self.blocked
    }
}
