//! Snapshot provider interfaces

use std::sync::Arc;

use chrono::{DateTime, Utc};

use arb_core::{CoreResult, PriceFeedResult, Snapshot};

/// Live source of market snapshots
#[async_trait::async_trait]
pub trait SnapshotProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the most recent snapshot
    async fn current_snapshot(&self) -> PriceFeedResult<Snapshot>;
}

#[async_trait::async_trait]
impl<P: SnapshotProvider + ?Sized> SnapshotProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn current_snapshot(&self) -> PriceFeedResult<Snapshot> {
        (**self).current_snapshot().await
    }
}

/// Historical snapshot store addressed by timestamp
pub trait HistoricalSource: Send + Sync {
    /// Timestamps with data inside `[start, end]`, ascending
    fn timestamps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>>;

    /// Snapshot recorded at exactly `at`; `DataUnavailable` when none exists
    fn snapshot_at(&self, at: DateTime<Utc>) -> CoreResult<Snapshot>;
}
