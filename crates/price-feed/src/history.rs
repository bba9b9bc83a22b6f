//! Historical snapshot store and replay

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use arb_core::{CoreError, CoreResult, PriceFeedError, PriceFeedResult, Snapshot};

use crate::provider::{HistoricalSource, SnapshotProvider};

/// Snapshots keyed by their own timestamp.
///
/// Entries that fail to parse are kept as failures at their timestamp, so a
/// replay reports them per step instead of losing the whole file.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    snapshots: BTreeMap<DateTime<Utc>, Snapshot>,
    malformed: BTreeMap<DateTime<Utc>, String>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot, replacing any previous one with the same timestamp
    pub fn insert(&mut self, snapshot: Snapshot) {
        self.malformed.remove(&snapshot.timestamp);
        self.snapshots.insert(snapshot.timestamp, snapshot);
    }

    /// Parse a JSON array of snapshots.
    ///
    /// Only a document that is not an array fails as a whole. A bad entry with
    /// a readable `timestamp` is kept as a failure for that timestamp; one
    /// without is skipped.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(json).map_err(|e| CoreError::SerializationError(e.to_string()))?;

        let mut history = Self::new();
        let mut unreadable = 0usize;
        for (index, entry) in entries.into_iter().enumerate() {
            let timestamp = entry
                .get("timestamp")
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse::<DateTime<Utc>>().ok());

            match serde_json::from_value::<Snapshot>(entry) {
                Ok(snapshot) => history.insert(snapshot),
                Err(e) => match timestamp {
                    Some(at) if !history.snapshots.contains_key(&at) => {
                        warn!("Malformed snapshot at {}: {}", at, e);
                        history.malformed.insert(at, e.to_string());
                    }
                    Some(at) => warn!("Ignoring malformed duplicate snapshot at {}: {}", at, e),
                    None => {
                        warn!("Skipping snapshot #{} without a timestamp: {}", index, e);
                        unreadable += 1;
                    }
                },
            }
        }

        if unreadable > 0 || !history.malformed.is_empty() {
            warn!(
                "{} malformed snapshots kept, {} unreadable skipped",
                history.malformed.len(),
                unreadable
            );
        }
        Ok(history)
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::SerializationError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let history = Self::from_json(&json)?;
        info!("Loaded {} snapshots from {}", history.len(), path.display());
        Ok(history)
    }

    /// Write to `path`, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let io_error = |e: std::io::Error| {
            CoreError::SerializationError(format!("failed to write {}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_error)?;
        info!("Saved {} snapshots to {}", self.len(), path.display());
        Ok(())
    }

    pub fn to_json(&self) -> CoreResult<String> {
        let snapshots: Vec<&Snapshot> = self.snapshots.values().collect();
        serde_json::to_string_pretty(&snapshots)
            .map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Number of usable snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Timestamps whose entry failed to parse
    pub fn malformed_count(&self) -> usize {
        self.malformed.len()
    }

    /// Earliest timestamp, malformed entries included
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        let good = self.snapshots.keys().next();
        let bad = self.malformed.keys().next();
        good.into_iter().chain(bad).min().copied()
    }

    /// Latest timestamp, malformed entries included
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        let good = self.snapshots.keys().next_back();
        let bad = self.malformed.keys().next_back();
        good.into_iter().chain(bad).max().copied()
    }

    /// Snapshots in timestamp order
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.values()
    }
}

impl FromIterator<Snapshot> for SnapshotHistory {
    fn from_iter<I: IntoIterator<Item = Snapshot>>(iter: I) -> Self {
        let mut history = Self::new();
        for snapshot in iter {
            history.insert(snapshot);
        }
        history
    }
}

impl HistoricalSource for SnapshotHistory {
    fn timestamps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if start > end {
            return Vec::new();
        }
        let range = (Bound::Included(start), Bound::Included(end));
        let good = self.snapshots.range(range).map(|(ts, _)| *ts);
        let bad = self.malformed.range(range).map(|(ts, _)| *ts);
        let mut timestamps: Vec<DateTime<Utc>> = good.chain(bad).collect();
        timestamps.sort_unstable();
        timestamps
    }

    fn snapshot_at(&self, at: DateTime<Utc>) -> CoreResult<Snapshot> {
        if let Some(reason) = self.malformed.get(&at) {
            return Err(CoreError::SerializationError(format!(
                "malformed snapshot at {}: {}",
                at, reason
            )));
        }
        self.snapshots
            .get(&at)
            .cloned()
            .ok_or(CoreError::DataUnavailable { at })
    }
}

/// Feeds historical snapshots to a live consumer, one per call
#[derive(Debug)]
pub struct ReplayProvider {
    snapshots: Vec<Snapshot>,
    cursor: Mutex<usize>,
}

impl ReplayProvider {
    pub fn new(history: &SnapshotHistory) -> Self {
        Self {
            snapshots: history.iter().cloned().collect(),
            cursor: Mutex::new(0),
        }
    }

    pub fn remaining(&self) -> usize {
        self.snapshots.len().saturating_sub(*self.cursor.lock())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn current_snapshot(&self) -> PriceFeedResult<Snapshot> {
        let mut cursor = self.cursor.lock();
        let snapshot = self
            .snapshots
            .get(*cursor)
            .cloned()
            .ok_or_else(|| PriceFeedError::DataUnavailable("replay exhausted".to_string()))?;
        *cursor += 1;
        debug!("Replaying snapshot {} of {}", *cursor, self.snapshots.len());
        Ok(snapshot)
    }
}
