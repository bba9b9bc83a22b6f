//! Exchange graph: directed, log-weighted conversion edges between assets

use std::collections::BTreeMap;

use tracing::{debug, warn};

use arb_core::{Asset, CoreError, PairQuote, Snapshot};

use crate::filter::AllowedAssets;

/// Directed conversion `from -> to`
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: Asset,
    pub to: Asset,
    /// Units of `to` per unit of `from`, before fees
    pub rate: f64,
    pub fee: f64,
    /// `ln(rate * (1 - fee))`; legs compose by summing
    pub log_weight: f64,
    /// Reverse leg approximated as `1 / forward rate` because no reverse quote existed
    pub derived: bool,
}

impl Edge {
    pub fn new(from: Asset, to: Asset, rate: f64, fee: f64, derived: bool) -> Self {
        Self {
            log_weight: (rate * (1.0 - fee)).ln(),
            from,
            to,
            rate,
            fee,
            derived,
        }
    }

    /// Multiplicative return of this single leg, net of fee
    pub fn gain(&self) -> f64 {
        self.log_weight.exp()
    }
}

/// Adjacency map. Ordered maps keep traversal lexicographic by asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeGraph {
    adjacency: BTreeMap<Asset, BTreeMap<Asset, Edge>>,
}

impl ExchangeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge. Self-loops are ignored. For an existing (from, to) an explicit
    /// quote beats a derived one; otherwise the newer edge replaces the older.
    pub fn add_edge(&mut self, edge: Edge) {
        if edge.from == edge.to {
            return;
        }

        let targets = self.adjacency.entry(edge.from.clone()).or_default();
        match targets.get(&edge.to) {
            Some(existing) if !existing.derived && edge.derived => {}
            _ => {
                targets.insert(edge.to.clone(), edge);
            }
        }
    }

    /// Outgoing edges of `asset`, ordered by destination
    pub fn neighbors<'g>(&'g self, asset: &Asset) -> impl Iterator<Item = &'g Edge> + 'g {
        self.adjacency
            .get(asset)
            .into_iter()
            .flat_map(|targets| targets.values())
    }

    pub fn edge(&self, from: &Asset, to: &Asset) -> Option<&Edge> {
        self.adjacency.get(from).and_then(|targets| targets.get(to))
    }

    /// Whether `asset` has at least one outgoing edge
    pub fn has_outgoing(&self, asset: &Asset) -> bool {
        self.adjacency.get(asset).map_or(false, |t| !t.is_empty())
    }

    pub fn vertex_count(&self) -> usize {
        let mut vertices: std::collections::BTreeSet<&Asset> = self.adjacency.keys().collect();
        vertices.extend(self.adjacency.values().flat_map(|t| t.keys()));
        vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.adjacency.values().flat_map(|t| t.values())
    }
}

/// Result of building a graph: bad pairs are reported, not fatal
#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub graph: ExchangeGraph,
    /// One `CoreError::InvalidSnapshot` per dropped pair
    pub rejected: Vec<CoreError>,
}

/// Converts snapshots into exchange graphs
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    default_fee: f64,
}

impl GraphBuilder {
    pub fn new(default_fee: f64) -> Self {
        Self { default_fee }
    }

    /// Build the graph for every permitted pair of `snapshot`.
    pub fn build(&self, snapshot: &Snapshot, allowed: &AllowedAssets) -> GraphBuild {
        let mut graph = ExchangeGraph::new();
        let mut rejected = Vec::new();
        let mut skipped = 0usize;

        for entry in snapshot.iter() {
            if !allowed.permits(&entry.pair.base) || !allowed.permits(&entry.pair.quote) {
                skipped += 1;
                continue;
            }

            match self.edges_for(entry) {
                Ok(edges) => {
                    for edge in edges {
                        graph.add_edge(edge);
                    }
                }
                Err(e) => {
                    warn!("Dropping pair: {}", e);
                    rejected.push(e);
                }
            }
        }

        debug!(
            "Built graph at {}: {} vertices, {} edges, {} pairs filtered, {} rejected",
            snapshot.timestamp,
            graph.vertex_count(),
            graph.edge_count(),
            skipped,
            rejected.len()
        );

        GraphBuild { graph, rejected }
    }

    fn edges_for(&self, entry: &PairQuote) -> Result<Vec<Edge>, CoreError> {
        let PairQuote { pair, quote } = entry;
        let invalid = |reason: String| CoreError::InvalidSnapshot {
            pair: pair.clone(),
            reason,
        };

        if pair.base == pair.quote {
            return Err(invalid("base and quote are the same asset".to_string()));
        }
        if !quote.rate.is_finite() || quote.rate <= 0.0 {
            return Err(invalid(format!("rate must be positive and finite, got {}", quote.rate)));
        }

        let fee = quote.fee.unwrap_or(self.default_fee);
        if !fee.is_finite() || !(0.0..1.0).contains(&fee) {
            return Err(invalid(format!("fee must be in [0, 1), got {}", fee)));
        }

        if let Some(reverse) = quote.reverse_rate {
            if !reverse.is_finite() || reverse <= 0.0 {
                return Err(invalid(format!(
                    "reverse rate must be positive and finite, got {}",
                    reverse
                )));
            }
        }

        let mut edges = vec![Edge::new(
            pair.base.clone(),
            pair.quote.clone(),
            quote.rate,
            fee,
            false,
        )];

        if quote.bidirectional {
            let (rate, derived) = match quote.reverse_rate {
                Some(reverse) => (reverse, false),
                None => (1.0 / quote.rate, true),
            };
            edges.push(Edge::new(pair.quote.clone(), pair.base.clone(), rate, fee, derived));
        }

        // Extreme rates can overflow once inverted or netted of fees
        if let Some(edge) = edges
            .iter()
            .find(|e| !e.rate.is_finite() || !e.log_weight.is_finite())
        {
            return Err(invalid(format!(
                "{} -> {} leg has no finite weight (rate {}, log weight {})",
                edge.from, edge.to, edge.rate, edge.log_weight
            )));
        }

        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{Quote, TradingPair};
    use chrono::Utc;

    fn asset(s: &str) -> Asset {
        Asset::from(s)
    }

    #[test]
    fn test_forward_and_derived_reverse() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0).with_fee(0.001));

        let build = GraphBuilder::new(0.0).build(&snapshot, &AllowedAssets::unrestricted());
        assert!(build.rejected.is_empty());

        let forward = build.graph.edge(&asset("BTC"), &asset("USDT")).unwrap();
        assert!(!forward.derived);
        assert!((forward.log_weight - (40_000.0f64 * 0.999).ln()).abs() < 1e-12);

        let reverse = build.graph.edge(&asset("USDT"), &asset("BTC")).unwrap();
        assert!(reverse.derived);
        assert!((reverse.gain() - 0.999 / 40_000.0).abs() < 1e-15);
    }

    #[test]
    fn test_explicit_reverse_and_one_way() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::from_book(0.05, 0.051, Some(0.0)))
            .with_pair(TradingPair::new("SOL", "BTC"), Quote::new(0.002).one_way());

        let build = GraphBuilder::new(0.001).build(&snapshot, &AllowedAssets::unrestricted());

        let reverse = build.graph.edge(&asset("BTC"), &asset("ETH")).unwrap();
        assert!(!reverse.derived);
        assert!((reverse.rate - 1.0 / 0.051).abs() < 1e-12);

        assert!(build.graph.edge(&asset("SOL"), &asset("BTC")).is_some());
        assert!(build.graph.edge(&asset("BTC"), &asset("SOL")).is_none());
    }

    #[test]
    fn test_bad_pairs_dropped_and_recorded() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BAD", "USDT"), Quote::new(0.0))
            .with_pair(TradingPair::new("NAN", "USDT"), Quote::new(f64::NAN))
            .with_pair(TradingPair::new("FEE", "USDT"), Quote::new(1.0).with_fee(1.5))
            .with_pair(TradingPair::new("USDT", "USDT"), Quote::new(1.0))
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0));

        let build = GraphBuilder::new(0.001).build(&snapshot, &AllowedAssets::unrestricted());
        assert_eq!(build.rejected.len(), 4);
        assert!(build
            .rejected
            .iter()
            .all(|e| matches!(e, CoreError::InvalidSnapshot { .. })));

        assert_eq!(build.graph.edge_count(), 2);
        assert!(build.graph.edge(&asset("BAD"), &asset("USDT")).is_none());
        assert!(build.graph.edge(&asset("USDT"), &asset("USDT")).is_none());
    }

    #[test]
    fn test_non_finite_derived_leg_rejected() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(1e-310))
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::new(0.05))
            .with_pair(TradingPair::new("ETH", "USDT"), Quote::new(2_000.0));

        let build = GraphBuilder::new(0.001).build(&snapshot, &AllowedAssets::unrestricted());
        assert_eq!(build.rejected.len(), 1);
        assert!(matches!(
            &build.rejected[0],
            CoreError::InvalidSnapshot { pair, .. } if *pair == TradingPair::new("BTC", "USDT")
        ));
        assert!(build.graph.edge(&asset("USDT"), &asset("BTC")).is_none());
        assert!(build.graph.edges().all(|e| e.log_weight.is_finite()));

        // The same rate is fine one way: its forward weight is finite
        let one_way = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(1e-310).one_way());
        let build = GraphBuilder::new(0.001).build(&one_way, &AllowedAssets::unrestricted());
        assert!(build.rejected.is_empty());
        assert_eq!(build.graph.edge_count(), 1);
    }

    #[test]
    fn test_filter_applies_to_both_assets() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0))
            .with_pair(TradingPair::new("DOGE", "USDT"), Quote::new(0.1));

        let allowed = AllowedAssets::new(
            [asset("BTC"), asset("USDT"), asset("DOGE")].into_iter().collect(),
            [asset("DOGE")].into_iter().collect(),
        );
        let build = GraphBuilder::new(0.0).build(&snapshot, &allowed);
        assert_eq!(build.graph.vertex_count(), 2);
        assert!(!build.graph.has_outgoing(&asset("DOGE")));
        assert!(build.rejected.is_empty());
    }

    #[test]
    fn test_explicit_quote_beats_derived_edge() {
        // BTC/ETH derives ETH -> BTC; the explicit ETH/BTC quote must win in either order
        let explicit_first = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::new(0.05))
            .with_pair(TradingPair::new("BTC", "ETH"), Quote::new(19.0));
        let derived_first = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "ETH"), Quote::new(19.0))
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::new(0.05));

        for snapshot in [explicit_first, derived_first] {
            let build = GraphBuilder::new(0.0).build(&snapshot, &AllowedAssets::unrestricted());
            let eth_btc = build.graph.edge(&asset("ETH"), &asset("BTC")).unwrap();
            assert!(!eth_btc.derived);
            assert_eq!(eth_btc.rate, 0.05);

            let btc_eth = build.graph.edge(&asset("BTC"), &asset("ETH")).unwrap();
            assert!(!btc_eth.derived);
            assert_eq!(btc_eth.rate, 19.0);
        }
    }

    #[test]
    fn test_latest_explicit_quote_wins() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0).one_way())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(41_000.0).one_way());

        let build = GraphBuilder::new(0.0).build(&snapshot, &AllowedAssets::unrestricted());
        assert_eq!(build.graph.edge_count(), 1);
        assert_eq!(build.graph.edge(&asset("BTC"), &asset("USDT")).unwrap().rate, 41_000.0);
    }
}
