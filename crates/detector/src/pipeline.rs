//! Evaluation pipeline: graph build -> cycle enumeration -> profitability tracking
//!
//! `evaluate` is a pure function of (snapshot, allowed assets, configuration).
//! `Pipeline` adds the tracker state shared by consecutive passes, and is the
//! single entry point used by both live monitoring and backtest replay.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use arb_core::{CoreError, CoreResult, CycleId, EngineConfig, ProfitabilityRecord, Snapshot};

use crate::enumerator::{find_cycles, Cycle};
use crate::filter::AllowedAssets;
use crate::graph::GraphBuilder;
use crate::tracker::{ProfitabilityTracker, TrackerStats};

/// Structural result of one pass over a snapshot
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub timestamp: DateTime<Utc>,
    /// Every simple cycle through the base, in enumeration order
    pub cycles: Vec<Cycle>,
    /// Pairs dropped while building the graph
    pub rejected: Vec<CoreError>,
    pub vertex_count: usize,
    pub edge_count: usize,
}

impl Evaluation {
    pub fn profitable(&self) -> impl Iterator<Item = &Cycle> {
        self.cycles.iter().filter(|c| c.is_profitable())
    }
}

/// Build the graph for `snapshot` and enumerate cycles through the base currency.
///
/// Fails with `GraphEmpty` when filtering leaves the base without outgoing edges.
pub fn evaluate(
    snapshot: &Snapshot,
    allowed: &AllowedAssets,
    config: &EngineConfig,
) -> CoreResult<Evaluation> {
    let build = GraphBuilder::new(config.trading_fee).build(snapshot, allowed);

    if !build.graph.has_outgoing(&config.base_currency) {
        return Err(CoreError::GraphEmpty {
            base: config.base_currency.clone(),
        });
    }

    let cycles = find_cycles(&build.graph, &config.base_currency, config.max_cycle_length);

    Ok(Evaluation {
        timestamp: snapshot.timestamp,
        cycles,
        vertex_count: build.graph.vertex_count(),
        edge_count: build.graph.edge_count(),
        rejected: build.rejected,
    })
}

/// Output of one pipeline step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub timestamp: DateTime<Utc>,
    /// One record per enumerated cycle, in enumeration order
    pub records: Vec<ProfitabilityRecord>,
    /// Records of this step above the profit threshold, best first
    pub active: Vec<ProfitabilityRecord>,
    pub rejected: Vec<CoreError>,
}

/// Stateful evaluation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EngineConfig,
    allowed: AllowedAssets,
    tracker: ProfitabilityTracker,
}

impl Pipeline {
    pub fn new(config: EngineConfig, allowed: AllowedAssets) -> Self {
        let tracker = ProfitabilityTracker::new(config.retention);
        Self {
            config,
            allowed,
            tracker,
        }
    }

    /// Evaluate one snapshot and record every cycle's gain at the snapshot's timestamp.
    ///
    /// A failed step records nothing. Cycles that have not been seen within the
    /// retention window are dropped afterwards.
    pub fn step(&mut self, snapshot: &Snapshot) -> CoreResult<StepOutcome> {
        let start = Instant::now();
        let evaluation = evaluate(snapshot, &self.allowed, &self.config)?;

        let observations: Vec<(&CycleId, f64)> = evaluation
            .cycles
            .iter()
            .map(|c| (&c.id, c.gain_ratio()))
            .collect();
        let records = self
            .tracker
            .observe_all(&observations, evaluation.timestamp)?;
        self.tracker.prune_stale(evaluation.timestamp);

        // Cycles absent from this snapshot keep stale records; only report current ones
        let active: Vec<ProfitabilityRecord> = self
            .tracker
            .active_opportunities(self.config.min_profit_threshold)
            .into_iter()
            .filter(|r| r.timestamp == evaluation.timestamp)
            .collect();

        debug!(
            "Step {}: {} vertices, {} edges, {} cycles, {} active in {:?}",
            evaluation.timestamp,
            evaluation.vertex_count,
            evaluation.edge_count,
            records.len(),
            active.len(),
            start.elapsed()
        );

        Ok(StepOutcome {
            timestamp: evaluation.timestamp,
            records,
            active,
            rejected: evaluation.rejected,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn allowed(&self) -> &AllowedAssets {
        &self.allowed
    }

    pub fn tracker(&self) -> &ProfitabilityTracker {
        &self.tracker
    }

    pub fn stats(&self) -> TrackerStats {
        self.tracker.stats()
    }
}
