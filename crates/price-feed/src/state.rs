//! Concurrent latest-quote book
//!
//! Uses DashMap for concurrent reads/writes with minimal contention

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use arb_core::{PriceFeedError, PriceFeedResult, Quote, Snapshot, TradingPair};

use crate::provider::SnapshotProvider;

/// Timestamped quote entry
#[derive(Debug, Clone)]
pub struct QuoteEntry {
    pub quote: Quote,
    pub updated_at: Instant,
}

impl QuoteEntry {
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

/// Latest quote per trading pair, fed by pushed updates
#[derive(Debug)]
pub struct QuoteBook {
    quotes: DashMap<TradingPair, QuoteEntry>,
    max_age: Duration,

    update_count: AtomicU64,
    last_update: RwLock<Instant>,
}

impl QuoteBook {
    pub fn new(max_age: Duration) -> Self {
        Self {
            quotes: DashMap::new(),
            max_age,
            update_count: AtomicU64::new(0),
            last_update: RwLock::new(Instant::now()),
        }
    }

    /// Replace the quote for `pair`
    pub fn update(&self, pair: TradingPair, quote: Quote) {
        let entry = QuoteEntry {
            quote,
            updated_at: Instant::now(),
        };

        self.quotes.insert(pair, entry);
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Instant::now();
    }

    pub fn get(&self, pair: &TradingPair) -> Option<QuoteEntry> {
        self.quotes.get(pair).map(|r| r.value().clone())
    }

    /// Materialize every fresh quote as a snapshot stamped now.
    ///
    /// Pairs are sorted so two books with the same content yield the same snapshot.
    pub fn to_snapshot(&self) -> Snapshot {
        let mut fresh: Vec<(TradingPair, Quote)> = self
            .quotes
            .iter()
            .filter(|e| !e.value().is_stale(self.max_age))
            .map(|e| (e.key().clone(), e.value().quote.clone()))
            .collect();
        fresh.sort_by(|a, b| a.0.cmp(&b.0));

        let mut snapshot = Snapshot::new(Utc::now());
        for (pair, quote) in fresh {
            snapshot.insert(pair, quote);
        }
        snapshot
    }

    /// Drop stale entries
    pub fn cleanup(&self) -> usize {
        let before = self.quotes.len();
        self.quotes.retain(|_, v| !v.is_stale(self.max_age));
        let removed = before - self.quotes.len();
        if removed > 0 {
            debug!("Removed {} stale quotes", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn stats(&self) -> QuoteBookStats {
        QuoteBookStats {
            quote_count: self.quotes.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().elapsed(),
        }
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for QuoteBook {
    fn name(&self) -> &str {
        "quote-book"
    }

    async fn current_snapshot(&self) -> PriceFeedResult<Snapshot> {
        let snapshot = self.to_snapshot();
        if snapshot.is_empty() {
            return Err(PriceFeedError::DataUnavailable(
                "quote book has no fresh quotes".to_string(),
            ));
        }
        Ok(snapshot)
    }
}

/// Statistics about the quote book
#[derive(Debug, Clone)]
pub struct QuoteBookStats {
    pub quote_count: usize,
    pub update_count: u64,
    pub last_update_age: Duration,
}
