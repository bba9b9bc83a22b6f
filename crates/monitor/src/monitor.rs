//! Live monitoring loop

use std::fmt;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use arb_core::{
    EngineConfig, MonitorConfig, MonitorError, MonitorResult, PriceFeedError, PriceFeedResult,
    Snapshot,
};
use arb_detector::{AllowedAssets, Pipeline, StepOutcome};
use arb_price_feed::SnapshotProvider;

use crate::reporter::{ReportBatch, Reporter};

/// Monitor loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Evaluating,
    Reporting,
    Backoff,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Polling => "polling",
            MonitorState::Evaluating => "evaluating",
            MonitorState::Reporting => "reporting",
            MonitorState::Backoff => "backoff",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Monitor statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Polls attempted, failed or not
    pub ticks: u64,
    pub evaluated: u64,
    /// Ticks whose snapshot could not be evaluated (e.g. empty graph)
    pub skipped: u64,
    pub fetch_failures: u64,
    pub records: u64,
    pub opportunities: u64,
}

/// Drives the evaluation pipeline against a live snapshot provider
pub struct MonitorLoop<P, R> {
    provider: P,
    reporter: R,
    pipeline: Pipeline,
    settings: MonitorConfig,
    state: MonitorState,
    stats: MonitorStats,
    max_ticks: Option<u64>,
}

impl<P: SnapshotProvider, R: Reporter> MonitorLoop<P, R> {
    pub fn new(
        config: EngineConfig,
        allowed: AllowedAssets,
        provider: P,
        reporter: R,
    ) -> MonitorResult<Self> {
        config.validate()?;

        Ok(Self {
            provider,
            reporter,
            settings: config.monitor,
            pipeline: Pipeline::new(config, allowed),
            state: MonitorState::Idle,
            stats: MonitorStats::default(),
            max_ticks: None,
        })
    }

    /// Stop after `ticks` polls (used for replays of known length)
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!("Monitor {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Run until stopped.
    ///
    /// The stop signal is only observed while waiting for the next tick or
    /// sitting out a backoff, so an evaluation in progress always completes and
    /// reports. Consecutive fetch failures beyond the configured limit stop the
    /// loop with `SourceUnreachable`.
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) -> MonitorResult<MonitorStats> {
        info!(
            "Starting monitor on {} (interval {:?}, base {})",
            self.provider.name(),
            self.settings.interval(),
            self.pipeline.config().base_currency
        );

        let mut interval = tokio::time::interval(self.settings.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            if self.max_ticks.map_or(false, |max| self.stats.ticks >= max) {
                info!("Reached {} ticks", self.stats.ticks);
                break;
            }

            self.transition(MonitorState::Idle);
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Monitor shutdown requested");
                    break;
                }
                _ = interval.tick() => {}
            }

            self.transition(MonitorState::Polling);
            self.stats.ticks += 1;

            match self.fetch().await {
                Ok(snapshot) => {
                    failures = 0;
                    self.evaluate(&snapshot);
                }
                Err(e) => {
                    failures += 1;
                    self.stats.fetch_failures += 1;

                    if failures >= self.settings.max_consecutive_failures {
                        self.transition(MonitorState::Stopped);
                        error!(
                            "Stopping monitor: {} consecutive fetch failures, last: {}",
                            failures, e
                        );
                        return Err(MonitorError::SourceUnreachable {
                            attempts: failures,
                            last_error: e,
                        });
                    }

                    let delay = self.settings.backoff_delay(failures);
                    self.transition(MonitorState::Backoff);
                    warn!(
                        "Snapshot fetch failed ({}/{}): {}, retrying in {:?}",
                        failures, self.settings.max_consecutive_failures, e, delay
                    );

                    tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            info!("Monitor shutdown requested during backoff");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    interval.reset_immediately();
                }
            }
        }

        self.transition(MonitorState::Stopped);
        info!(
            "Monitor stopped: {} ticks, {} evaluated, {} skipped, {} fetch failures",
            self.stats.ticks, self.stats.evaluated, self.stats.skipped, self.stats.fetch_failures
        );
        Ok(self.stats)
    }

    async fn fetch(&self) -> PriceFeedResult<Snapshot> {
        match tokio::time::timeout(self.settings.fetch_timeout(), self.provider.current_snapshot())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PriceFeedError::Timeout),
        }
    }

    /// Evaluate and report one snapshot. Per-tick errors are absorbed.
    fn evaluate(&mut self, snapshot: &Snapshot) -> Option<StepOutcome> {
        self.transition(MonitorState::Evaluating);
        let start = Instant::now();

        let outcome = match self.pipeline.step(snapshot) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping tick at {}: {}", snapshot.timestamp, e);
                self.stats.skipped += 1;
                return None;
            }
        };

        self.stats.evaluated += 1;
        self.stats.records += outcome.records.len() as u64;
        self.stats.opportunities += outcome.active.len() as u64;

        self.transition(MonitorState::Reporting);
        self.reporter.report(&ReportBatch {
            timestamp: outcome.timestamp,
            cycles_evaluated: outcome.records.len(),
            opportunities: outcome.active.clone(),
        });

        debug!(
            "Tick at {} evaluated in {:?}: {} cycles, {} active, {} pairs rejected",
            outcome.timestamp,
            start.elapsed(),
            outcome.records.len(),
            outcome.active.len(),
            outcome.rejected.len()
        );

        Some(outcome)
    }
}
