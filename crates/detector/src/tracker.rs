//! Per-cycle profitability time series with bounded retention

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use arb_core::{CoreError, CoreResult, CycleId, ProfitabilityRecord, RetentionConfig};

/// Keeps an ordered history of profitability records per cycle.
///
/// Series are created lazily on first observation. Each series is bounded by
/// age (relative to its newest record) and by capacity, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ProfitabilityTracker {
    retention: RetentionConfig,
    series: BTreeMap<CycleId, VecDeque<ProfitabilityRecord>>,
    observations: u64,
    evictions: u64,
}

impl ProfitabilityTracker {
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            retention,
            series: BTreeMap::new(),
            observations: 0,
            evictions: 0,
        }
    }

    /// Append one observation.
    ///
    /// A timestamp older than the newest record of the same cycle is rejected
    /// with `OutOfOrder`; equal timestamps are accepted.
    pub fn observe(
        &mut self,
        cycle: &CycleId,
        gain_ratio: f64,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<ProfitabilityRecord> {
        self.check_order(cycle, timestamp)?;
        Ok(self.append(cycle, gain_ratio, timestamp))
    }

    /// Append one observation per cycle, all at `timestamp`.
    ///
    /// Every cycle is checked before anything is appended, so an `OutOfOrder`
    /// rejection leaves the tracker untouched.
    pub fn observe_all(
        &mut self,
        observations: &[(&CycleId, f64)],
        timestamp: DateTime<Utc>,
    ) -> CoreResult<Vec<ProfitabilityRecord>> {
        for (cycle, _) in observations {
            self.check_order(cycle, timestamp)?;
        }

        Ok(observations
            .iter()
            .map(|(cycle, gain_ratio)| self.append(cycle, *gain_ratio, timestamp))
            .collect())
    }

    /// Drop every series whose newest record fell behind the retention
    /// horizon of `now`. Returns the number of series removed.
    pub fn prune_stale(&mut self, now: DateTime<Utc>) -> usize {
        let Some(horizon) = self.retention.horizon(now) else {
            return 0;
        };

        let before = self.series.len();
        let mut evicted = 0u64;
        self.series.retain(|_, series| {
            let keep = series.back().is_some_and(|r| r.timestamp >= horizon);
            if !keep {
                evicted += series.len() as u64;
            }
            keep
        });

        let removed = before - self.series.len();
        if removed > 0 {
            debug!("Pruned {} stale cycles ({} records)", removed, evicted);
            self.evictions += evicted;
        }
        removed
    }

    fn check_order(&self, cycle: &CycleId, timestamp: DateTime<Utc>) -> CoreResult<()> {
        match self.series.get(cycle).and_then(|s| s.back()) {
            Some(last) if timestamp < last.timestamp => Err(CoreError::OutOfOrder {
                cycle: cycle.clone(),
                last: last.timestamp,
                got: timestamp,
            }),
            _ => Ok(()),
        }
    }

    fn append(
        &mut self,
        cycle: &CycleId,
        gain_ratio: f64,
        timestamp: DateTime<Utc>,
    ) -> ProfitabilityRecord {
        let horizon = self.retention.horizon(timestamp);
        let capacity = self.retention.capacity;
        let series = self.series.entry(cycle.clone()).or_default();

        let record = ProfitabilityRecord::new(cycle.clone(), gain_ratio, timestamp);
        series.push_back(record.clone());
        self.observations += 1;

        let mut evicted = 0u64;
        while let Some(front) = series.front() {
            let expired = horizon.is_some_and(|h| front.timestamp < h);
            if expired || series.len() > capacity {
                series.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }

        if evicted > 0 {
            trace!("Evicted {} records from {}", evicted, cycle);
            self.evictions += evicted;
        }

        record
    }

    /// Records of `cycle`, oldest first. Empty for unknown cycles.
    pub fn series(&self, cycle: &CycleId) -> impl Iterator<Item = &ProfitabilityRecord> {
        self.series.get(cycle).into_iter().flat_map(|s| s.iter())
    }

    pub fn latest(&self, cycle: &CycleId) -> Option<&ProfitabilityRecord> {
        self.series.get(cycle).and_then(|s| s.back())
    }

    /// Latest record of every cycle whose net profit exceeds `threshold_pct`,
    /// best first; ties ordered by cycle identity.
    pub fn active_opportunities(&self, threshold_pct: f64) -> Vec<ProfitabilityRecord> {
        let mut active: Vec<ProfitabilityRecord> = self
            .series
            .values()
            .filter_map(|s| s.back())
            .filter(|r| r.net_profit_pct > threshold_pct)
            .cloned()
            .collect();

        active.sort_by(|a, b| {
            b.net_profit_pct
                .total_cmp(&a.net_profit_pct)
                .then_with(|| a.cycle.cmp(&b.cycle))
        });

        debug!(
            "{} of {} cycles above {:.4}%",
            active.len(),
            self.series.len(),
            threshold_pct
        );

        active
    }

    pub fn cycle_count(&self) -> usize {
        self.series.len()
    }

    pub fn record_count(&self) -> usize {
        self.series.values().map(VecDeque::len).sum()
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            cycle_count: self.cycle_count(),
            record_count: self.record_count(),
            observations: self.observations,
            evictions: self.evictions,
        }
    }
}

impl Default for ProfitabilityTracker {
    fn default() -> Self {
        Self::new(RetentionConfig::default())
    }
}

/// Tracker statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub cycle_count: usize,
    pub record_count: usize,
    pub observations: u64,
    pub evictions: u64,
}
