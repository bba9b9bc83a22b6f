//! Output boundary for active opportunities

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use arb_core::ProfitabilityRecord;

/// Active opportunities of one tick or backtest step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportBatch {
    pub timestamp: DateTime<Utc>,
    pub cycles_evaluated: usize,
    /// Best first
    pub opportunities: Vec<ProfitabilityRecord>,
}

/// Receives one batch per evaluated tick
pub trait Reporter: Send + Sync {
    fn report(&self, batch: &ReportBatch);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, batch: &ReportBatch) {
        (**self).report(batch)
    }
}

/// Logs every opportunity through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, batch: &ReportBatch) {
        if batch.opportunities.is_empty() {
            debug!(
                "{}: {} cycles evaluated, no opportunities",
                batch.timestamp, batch.cycles_evaluated
            );
            return;
        }

        info!(
            "{}: {} opportunities out of {} cycles",
            batch.timestamp,
            batch.opportunities.len(),
            batch.cycles_evaluated
        );
        for record in &batch.opportunities {
            info!(
                "Opportunity: {} profit={:.4}% gain={:.6}",
                record.cycle, record.net_profit_pct, record.gain_ratio
            );
        }
    }
}

/// Keeps every batch in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    batches: Mutex<Vec<ReportBatch>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<ReportBatch> {
        self.batches.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, batch: &ReportBatch) {
        self.batches.lock().push(batch.clone());
    }
}

/// Forwards batches to an async consumer; a closed receiver drops batches
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ReportBatch>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReportBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, batch: &ReportBatch) {
        if self.tx.send(batch.clone()).is_err() {
            debug!("Report channel closed");
        }
    }
}

/// Fans each batch out to several reporters
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Reporter for MultiReporter {
    fn report(&self, batch: &ReportBatch) {
        for reporter in &self.reporters {
            reporter.report(batch);
        }
    }
}
