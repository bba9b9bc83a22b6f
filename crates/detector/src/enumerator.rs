//! Bounded cycle enumeration from a base asset

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use arb_core::{net_profit_pct, Asset, CycleId};

use crate::graph::ExchangeGraph;

/// Simple cycle through the base asset, with its summed log weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    pub id: CycleId,
    pub log_weight: f64,
    /// Number of legs that use a `1 / rate` approximation
    pub derived_legs: usize,
}

impl Cycle {
    /// Units of base returned per unit of base committed
    pub fn gain_ratio(&self) -> f64 {
        self.log_weight.exp()
    }

    pub fn net_profit_pct(&self) -> f64 {
        net_profit_pct(self.gain_ratio())
    }

    pub fn legs(&self) -> usize {
        self.id.legs()
    }

    pub fn is_profitable(&self) -> bool {
        self.log_weight > 0.0
    }
}

/// Depth-first search state for one enumeration
struct Search<'g> {
    graph: &'g ExchangeGraph,
    base: &'g Asset,
    max_length: usize,
    path: Vec<Asset>,
    visited: BTreeSet<Asset>,
    found: Vec<Cycle>,
}

impl<'g> Search<'g> {
    fn extend(&mut self, current: &'g Asset, weight: f64, derived_legs: usize) {
        let graph = self.graph;
        for edge in graph.neighbors(current) {
            if &edge.to == self.base {
                if self.path.len() >= 3 {
                    self.found.push(Cycle {
                        id: CycleId::new(self.path.clone()),
                        log_weight: weight + edge.log_weight,
                        derived_legs: derived_legs + usize::from(edge.derived),
                    });
                }
                continue;
            }

            if self.path.len() >= self.max_length || self.visited.contains(&edge.to) {
                continue;
            }

            self.path.push(edge.to.clone());
            self.visited.insert(edge.to.clone());

            self.extend(
                &edge.to,
                weight + edge.log_weight,
                derived_legs + usize::from(edge.derived),
            );

            self.visited.remove(&edge.to);
            self.path.pop();
        }
    }
}

/// Find every simple cycle through `base` with 3 to `max_length` legs.
///
/// Traversal follows lexicographic neighbor order, so the output order is the
/// same on every run for the same graph. Rotations of a cycle starting at a
/// different asset are never produced since every cycle starts at `base`.
pub fn find_cycles(graph: &ExchangeGraph, base: &Asset, max_length: usize) -> Vec<Cycle> {
    let start = Instant::now();

    let mut search = Search {
        graph,
        base,
        max_length,
        path: vec![base.clone()],
        visited: BTreeSet::from([base.clone()]),
        found: Vec::new(),
    };

    if max_length >= 3 {
        search.extend(base, 0.0, 0);
    }

    debug!(
        "Enumerated {} cycles from {} (max {} legs) in {:?}",
        search.found.len(),
        base,
        max_length,
        start.elapsed()
    );

    search.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AllowedAssets;
    use crate::graph::{Edge, GraphBuilder};
    use arb_core::{Quote, Snapshot, TradingPair};
    use chrono::Utc;
    use proptest::prelude::*;

    fn asset(s: &str) -> Asset {
        Asset::from(s)
    }

    fn one_way_graph(edges: &[(&str, &str, f64)]) -> ExchangeGraph {
        let mut graph = ExchangeGraph::new();
        for (from, to, rate) in edges {
            graph.add_edge(Edge::new(asset(from), asset(to), *rate, 0.0, false));
        }
        graph
    }

    #[test]
    fn test_triangle_gain() {
        // 1 USDT -> 2 BTC -> 6 ETH -> 1.2 USDT
        let graph = one_way_graph(&[("USDT", "BTC", 2.0), ("BTC", "ETH", 3.0), ("ETH", "USDT", 0.2)]);
        let cycles = find_cycles(&graph, &asset("USDT"), 3);

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].id.to_string(), "USDT -> BTC -> ETH -> USDT");
        assert!((cycles[0].gain_ratio() - 1.2).abs() < 1e-9);
        assert!((cycles[0].net_profit_pct() - 20.0).abs() < 1e-6);
        assert!(cycles[0].is_profitable());
    }

    #[test]
    fn test_two_leg_round_trips_excluded() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0));
        let build = GraphBuilder::new(0.0).build(&snapshot, &AllowedAssets::unrestricted());

        assert!(find_cycles(&build.graph, &asset("USDT"), 3).is_empty());
    }

    #[test]
    fn test_max_length_bounds_search() {
        let graph = one_way_graph(&[
            ("A", "B", 1.0),
            ("B", "C", 1.0),
            ("C", "D", 1.0),
            ("D", "A", 1.0),
            ("C", "A", 1.0),
        ]);

        let short = find_cycles(&graph, &asset("A"), 3);
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].legs(), 3);

        let long = find_cycles(&graph, &asset("A"), 4);
        assert_eq!(long.len(), 2);
        assert!(long.iter().any(|c| c.legs() == 4));

        assert!(find_cycles(&graph, &asset("A"), 2).is_empty());
    }

    #[test]
    fn test_lexicographic_order() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0))
            .with_pair(TradingPair::new("ETH", "USDT"), Quote::new(2_000.0))
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::new(0.05));
        let build = GraphBuilder::new(0.001).build(&snapshot, &AllowedAssets::unrestricted());

        let ids: Vec<String> = find_cycles(&build.graph, &asset("USDT"), 3)
            .iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(
            ids,
            vec!["USDT -> BTC -> ETH -> USDT", "USDT -> ETH -> BTC -> USDT"]
        );
    }

    #[test]
    fn test_derived_legs_counted() {
        let snapshot = Snapshot::new(Utc::now())
            .with_pair(TradingPair::new("BTC", "USDT"), Quote::new(40_000.0))
            .with_pair(TradingPair::new("ETH", "USDT"), Quote::new(2_000.0))
            .with_pair(TradingPair::new("ETH", "BTC"), Quote::new(0.05));
        let build = GraphBuilder::new(0.001).build(&snapshot, &AllowedAssets::unrestricted());

        let cycles = find_cycles(&build.graph, &asset("USDT"), 3);
        // USDT -> BTC (derived), BTC -> ETH (derived), ETH -> USDT (explicit)
        assert_eq!(cycles[0].derived_legs, 2);
        assert_eq!(cycles[1].derived_legs, 1);
    }

    #[test]
    fn test_missing_base_yields_nothing() {
        let graph = one_way_graph(&[("A", "B", 1.0), ("B", "C", 1.0), ("C", "A", 1.0)]);
        assert!(find_cycles(&graph, &asset("USDT"), 5).is_empty());
    }

    fn arb_graph() -> impl Strategy<Value = ExchangeGraph> {
        let names = ["A", "B", "C", "D", "E", "F"];
        prop::collection::vec((0usize..6, 0usize..6, 0.5f64..2.0, 0.0f64..0.01), 0..30).prop_map(
            move |edges| {
                let mut graph = ExchangeGraph::new();
                for (from, to, rate, fee) in edges {
                    graph.add_edge(Edge::new(asset(names[from]), asset(names[to]), rate, fee, false));
                }
                graph
            },
        )
    }

    proptest! {
        #[test]
        fn prop_cycles_are_simple_and_bounded(graph in arb_graph(), max_length in 3usize..6) {
            let base = asset("A");
            for cycle in find_cycles(&graph, &base, max_length) {
                prop_assert!(cycle.legs() >= 3 && cycle.legs() <= max_length);
                prop_assert_eq!(cycle.id.base(), Some(&base));

                let distinct: BTreeSet<&Asset> = cycle.id.assets().iter().collect();
                prop_assert_eq!(distinct.len(), cycle.legs());

                let mut weight = 0.0;
                for (from, to) in cycle.id.hops() {
                    let edge = graph.edge(from, to);
                    prop_assert!(edge.is_some());
                    weight += edge.map_or(0.0, |e| e.log_weight);
                }
                prop_assert!((weight - cycle.log_weight).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_enumeration_is_deterministic(graph in arb_graph()) {
            let first = find_cycles(&graph, &asset("A"), 5);
            let second = find_cycles(&graph, &asset("A"), 5);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_lossy_markets_have_no_profit(
            rates in prop::collection::vec(0.1f64..1.0, 12),
            fee in 0.0f64..0.05,
        ) {
            // Every leg loses value, so no cycle can gain
            let names = ["A", "B", "C", "D"];
            let mut graph = ExchangeGraph::new();
            let mut i = 0;
            for from in names {
                for to in names {
                    if from != to {
                        graph.add_edge(Edge::new(asset(from), asset(to), rates[i], fee, false));
                        i += 1;
                    }
                }
            }
            for cycle in find_cycles(&graph, &asset("A"), 4) {
                prop_assert!(cycle.gain_ratio() <= 1.0);
            }
        }
    }
}
