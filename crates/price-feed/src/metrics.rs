//! Per-asset liquidity metrics from 24h per-pair statistics

use std::collections::{BTreeSet, HashMap};

use arb_core::{Asset, LiquidityMetrics, TradingPair};

/// 24h statistics of one trading pair
#[derive(Debug, Clone, PartialEq)]
pub struct PairStats {
    pub pair: TradingPair,
    /// Traded volume in units of the quote asset
    pub quote_volume: f64,
    pub price_change_pct: f64,
}

/// Fold pair statistics into per-asset metrics.
///
/// Volume is the summed quote volume of every pair containing the asset;
/// volatility is the largest absolute price change among those pairs.
/// Non-finite samples are ignored.
pub fn aggregate_metrics(stats: &[PairStats]) -> HashMap<Asset, LiquidityMetrics> {
    let mut metrics: HashMap<Asset, LiquidityMetrics> = HashMap::new();

    for entry in stats {
        for asset in [&entry.pair.base, &entry.pair.quote] {
            let m = metrics.entry(asset.clone()).or_default();

            if entry.quote_volume.is_finite() {
                m.volume = Some(m.volume.unwrap_or(0.0) + entry.quote_volume);
            }
            if entry.price_change_pct.is_finite() {
                let change = entry.price_change_pct.abs();
                m.volatility = Some(m.volatility.map_or(change, |v| v.max(change)));
            }
        }
    }

    metrics
}

/// Every asset appearing in `stats`
pub fn candidate_assets(stats: &[PairStats]) -> BTreeSet<Asset> {
    stats
        .iter()
        .flat_map(|s| [s.pair.base.clone(), s.pair.quote.clone()])
        .collect()
}
