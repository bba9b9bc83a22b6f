//! Historical replay of the evaluation pipeline

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use arb_core::{CoreError, CoreResult, EngineConfig, ProfitabilityRecord};
use arb_detector::{AllowedAssets, Pipeline};
use arb_price_feed::HistoricalSource;

use crate::reporter::{ReportBatch, Reporter};

/// What happened at one backtest timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Evaluated { cycles: usize, active: usize },
    /// The snapshot loaded but left nothing to evaluate
    Skipped(CoreError),
    Failed(CoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
}

impl StepReport {
    pub fn is_evaluated(&self) -> bool {
        matches!(self.status, StepStatus::Evaluated { .. })
    }
}

/// Full result of one backtest run
#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub steps: Vec<StepReport>,
    /// Every record, in timestamp order then enumeration order
    pub records: Vec<ProfitabilityRecord>,
    /// Records above the profit threshold, per step best first
    pub opportunities: Vec<ProfitabilityRecord>,
}

impl BacktestReport {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn evaluated_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_evaluated()).count()
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    /// Most profitable record of the run
    pub fn best(&self) -> Option<&ProfitabilityRecord> {
        self.opportunities
            .iter()
            .max_by(|a, b| a.net_profit_pct.total_cmp(&b.net_profit_pct))
    }

    /// `"N of M steps evaluated"`
    pub fn summary(&self) -> String {
        format!(
            "{} of {} steps evaluated",
            self.evaluated_steps(),
            self.total_steps()
        )
    }
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        writeln!(
            f,
            "{} records, {} opportunities",
            self.records.len(),
            self.opportunities.len()
        )?;
        if let Some(best) = self.best() {
            writeln!(
                f,
                "Best: {} profit={:.4}% at {}",
                best.cycle, best.net_profit_pct, best.timestamp
            )?;
        }
        for step in self.failed_steps() {
            if let StepStatus::Failed(e) = &step.status {
                writeln!(f, "Failed at {}: {}", step.timestamp, e)?;
            }
        }
        Ok(())
    }
}

/// Replays historical snapshots through the same pipeline the monitor uses
#[derive(Debug, Clone)]
pub struct BacktestRunner {
    config: EngineConfig,
    allowed: AllowedAssets,
    step: Option<Duration>,
}

impl BacktestRunner {
    pub fn new(config: EngineConfig, allowed: AllowedAssets) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            allowed,
            step: None,
        })
    }

    /// Evaluate a fixed grid `start, start + step, ..` instead of the stored
    /// timestamps; grid points without data become failed steps.
    pub fn with_step(mut self, step: Duration) -> Self {
        if step > Duration::zero() {
            self.step = Some(step);
        }
        self
    }

    fn schedule<S: HistoricalSource + ?Sized>(
        &self,
        source: &S,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        match self.step {
            Some(step) => {
                let mut grid = Vec::new();
                let mut next = Some(start);
                while let Some(ts) = next.filter(|ts| *ts <= end) {
                    grid.push(ts);
                    next = ts.checked_add_signed(step);
                }
                grid
            }
            None => source.timestamps(start, end),
        }
    }

    /// Replay `[start, end]` sequentially with one tracker
    pub fn run<S: HistoricalSource + ?Sized>(
        &self,
        source: &S,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BacktestReport {
        let begin = Instant::now();
        let schedule = self.schedule(source, start, end);
        info!("Backtesting {} steps from {} to {}", schedule.len(), start, end);

        let report = self.replay(source, &schedule, None);

        info!("Backtest finished in {:?}: {}", begin.elapsed(), report.summary());
        report
    }

    /// Like `run`, reporting each evaluated step as it completes
    pub fn run_with_reporter<S: HistoricalSource + ?Sized>(
        &self,
        source: &S,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reporter: &dyn Reporter,
    ) -> BacktestReport {
        let schedule = self.schedule(source, start, end);
        let report = self.replay(source, &schedule, Some(reporter));
        info!("{}", report.summary());
        report
    }

    /// Replay in parallel chunks of `chunk_size` steps.
    ///
    /// Each chunk owns an isolated tracker; chunk results are merged and
    /// re-sorted by timestamp, so the output matches `run`.
    pub fn run_parallel<S: HistoricalSource + Sync + ?Sized>(
        &self,
        source: &S,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        chunk_size: usize,
    ) -> BacktestReport {
        let begin = Instant::now();
        let schedule = self.schedule(source, start, end);
        let chunk_size = chunk_size.max(1);
        info!(
            "Backtesting {} steps in chunks of {}",
            schedule.len(),
            chunk_size
        );

        let partials: Vec<BacktestReport> = schedule
            .par_chunks(chunk_size)
            .map(|chunk| self.replay(source, chunk, None))
            .collect();

        let mut report = BacktestReport::default();
        for partial in partials {
            report.steps.extend(partial.steps);
            report.records.extend(partial.records);
            report.opportunities.extend(partial.opportunities);
        }
        report.steps.sort_by_key(|s| s.timestamp);
        report.records.sort_by_key(|r| r.timestamp);
        report.opportunities.sort_by_key(|r| r.timestamp);

        info!(
            "Parallel backtest finished in {:?}: {}",
            begin.elapsed(),
            report.summary()
        );
        report
    }

    fn replay<S: HistoricalSource + ?Sized>(
        &self,
        source: &S,
        schedule: &[DateTime<Utc>],
        reporter: Option<&dyn Reporter>,
    ) -> BacktestReport {
        let mut pipeline = Pipeline::new(self.config.clone(), self.allowed.clone());
        let mut report = BacktestReport::default();

        for &timestamp in schedule {
            let status = match source.snapshot_at(timestamp) {
                Err(e) => {
                    warn!("No snapshot at {}: {}", timestamp, e);
                    StepStatus::Failed(e)
                }
                Ok(snapshot) => match pipeline.step(&snapshot) {
                    Ok(outcome) => {
                        if let Some(reporter) = reporter {
                            reporter.report(&ReportBatch {
                                timestamp: outcome.timestamp,
                                cycles_evaluated: outcome.records.len(),
                                opportunities: outcome.active.clone(),
                            });
                        }
                        let status = StepStatus::Evaluated {
                            cycles: outcome.records.len(),
                            active: outcome.active.len(),
                        };
                        report.records.extend(outcome.records);
                        report.opportunities.extend(outcome.active);
                        status
                    }
                    Err(e @ CoreError::GraphEmpty { .. }) => {
                        warn!("Skipping step at {}: {}", timestamp, e);
                        StepStatus::Skipped(e)
                    }
                    Err(e) => {
                        warn!("Step at {} failed: {}", timestamp, e);
                        StepStatus::Failed(e)
                    }
                },
            };

            debug!("Step {}: {:?}", timestamp, status);
            report.steps.push(StepReport { timestamp, status });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorLoop;
    use crate::reporter::CollectingReporter;
    use arb_core::{MonitorConfig, Quote, Snapshot, TradingPair};
    use arb_price_feed::{ReplayProvider, SnapshotHistory};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            monitor: MonitorConfig {
                interval_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Market where the BTC/ETH cross drifts, opening and closing a triangle
    fn market(secs: i64) -> Snapshot {
        let drift = (secs % 7) as f64 * 0.004;
        Snapshot::new(at(secs))
            .with_pair(
                TradingPair::new("BTC", "USDT"),
                Quote::from_book(40_000.0, 40_010.0, None),
            )
            .with_pair(
                TradingPair::new("ETH", "USDT"),
                Quote::from_book(2_000.0, 2_000.5, None),
            )
            .with_pair(
                TradingPair::new("ETH", "BTC"),
                Quote::from_book(0.0495 + drift / 10.0, 0.0505 + drift / 10.0, None),
            )
            .with_pair(
                TradingPair::new("SOL", "USDT"),
                Quote::from_book(100.0, 100.1, None),
            )
            .with_pair(TradingPair::new("SOL", "BTC"), Quote::new(0.0026))
    }

    fn history(steps: i64) -> SnapshotHistory {
        (0..steps).map(|i| market(i * 60)).collect()
    }

    #[test]
    fn test_report_counts_failed_steps() {
        let mut history = history(5);
        history.insert(
            Snapshot::new(at(600)).with_pair(TradingPair::new("BTC", "EUR"), Quote::new(37_000.0)),
        );

        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted())
            .unwrap()
            .with_step(Duration::seconds(60));
        let report = runner.run(&history, at(0), at(600));

        // Grid has 11 points; 5 carry data, one more has no USDT market
        assert_eq!(report.total_steps(), 11);
        assert_eq!(report.evaluated_steps(), 5);
        assert_eq!(report.summary(), "5 of 11 steps evaluated");
        assert_eq!(report.failed_steps().count(), 5);
        assert!(matches!(
            report.steps.last().map(|s| &s.status),
            Some(StepStatus::Skipped(CoreError::GraphEmpty { .. }))
        ));
        assert!(matches!(
            report.steps[5].status,
            StepStatus::Failed(CoreError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_malformed_snapshot_fails_only_its_step() {
        let mut entries: Vec<serde_json::Value> = [0, 60, 120]
            .into_iter()
            .map(|secs| serde_json::to_value(market(secs)).unwrap())
            .collect();
        entries[1]["pairs"][0]["rate"] = serde_json::json!("oops");
        let json = serde_json::to_string(&entries).unwrap();

        let history = SnapshotHistory::from_json(&json).unwrap();
        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted()).unwrap();
        let report = runner.run(&history, at(0), at(120));

        assert_eq!(report.summary(), "2 of 3 steps evaluated");
        assert_eq!(report.steps[1].timestamp, at(60));
        assert!(matches!(
            report.steps[1].status,
            StepStatus::Failed(CoreError::SerializationError(_))
        ));
        assert!(report.steps[2].is_evaluated());
    }

    #[test]
    fn test_grid_stops_at_time_limit() {
        let history = history(1);
        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted())
            .unwrap()
            .with_step(Duration::days(365 * 100_000));

        let report = runner.run(&history, at(0), DateTime::<Utc>::MAX_UTC);
        assert!(report.total_steps() >= 1);
        assert_eq!(report.steps[0].timestamp, at(0));
        assert!(report.steps[0].is_evaluated());
    }

    #[test]
    fn test_records_in_timestamp_order() {
        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted()).unwrap();
        let report = runner.run(&history(10), at(0), at(10_000));

        assert_eq!(report.evaluated_steps(), 10);
        assert!(!report.records.is_empty());
        assert!(report
            .records
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(report.to_string().starts_with("10 of 10 steps evaluated"));
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted()).unwrap();
        let report = runner.run(&history(10), at(120), at(300));
        assert_eq!(report.total_steps(), 4);
        assert_eq!(report.steps[0].timestamp, at(120));
        assert_eq!(report.steps[3].timestamp, at(300));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let history = history(25);
        let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted()).unwrap();

        let sequential = runner.run(&history, at(0), at(100_000));
        let parallel = runner.run_parallel(&history, at(0), at(100_000), 4);

        assert_eq!(sequential.steps, parallel.steps);
        assert_eq!(sequential.records, parallel.records);
        assert_eq!(sequential.opportunities, parallel.opportunities);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn prop_chunking_does_not_change_results(steps in 1i64..30, chunk in 1usize..40) {
            let history = history(steps);
            let runner = BacktestRunner::new(config(), AllowedAssets::unrestricted()).unwrap();

            let sequential = runner.run(&history, at(0), at(100_000));
            let parallel = runner.run_parallel(&history, at(0), at(100_000), chunk);

            proptest::prop_assert_eq!(sequential.steps, parallel.steps);
            proptest::prop_assert_eq!(sequential.records, parallel.records);
        }
    }

    #[tokio::test]
    async fn test_live_replay_matches_backtest() {
        let history = history(8);
        let config = config();

        let runner = BacktestRunner::new(config.clone(), AllowedAssets::unrestricted()).unwrap();
        let backtest_reporter = CollectingReporter::new();
        let report = runner.run_with_reporter(
            &history,
            at(0),
            at(100_000),
            &backtest_reporter,
        );

        let live_reporter = Arc::new(CollectingReporter::new());
        let mut monitor = MonitorLoop::new(
            config,
            AllowedAssets::unrestricted(),
            ReplayProvider::new(&history),
            Arc::clone(&live_reporter),
        )
        .unwrap()
        .with_max_ticks(history.len() as u64);

        let (_tx, rx) = tokio::sync::oneshot::channel();
        let stats = monitor.run(rx).await.unwrap();

        assert_eq!(stats.evaluated as usize, report.evaluated_steps());
        assert_eq!(live_reporter.batches(), backtest_reporter.batches());

        // Identical cycle identities and gain ratios, bit for bit
        let tracker = monitor.pipeline().tracker();
        assert_eq!(tracker.record_count(), report.records.len());
        for record in &report.records {
            let live = tracker
                .series(&record.cycle)
                .find(|r| r.timestamp == record.timestamp)
                .map(|r| r.gain_ratio.to_bits());
            assert_eq!(live, Some(record.gain_ratio.to_bits()));
        }
    }
}
