//! Market snapshot providers
//!
//! Features:
//! - Async live snapshot interface and historical lookup by timestamp
//! - Exchange REST client with bounded request timeouts
//! - Lock-free latest-quote book with staleness detection
//! - Book ticker WebSocket stream feeding the quote book
//! - Historical snapshots aligned from exchange klines
//! - Historical snapshot store and replay
//! - Per-asset liquidity metrics from 24h statistics

pub mod provider;
pub mod state;
pub mod history;
pub mod binance;
pub mod stream;
pub mod metrics;

pub use provider::{HistoricalSource, SnapshotProvider};
pub use state::{QuoteBook, QuoteBookStats};
pub use history::{ReplayProvider, SnapshotHistory};
pub use binance::{history_from_klines, BinanceClient, Kline};
pub use stream::{BookTickerStream, StreamConfig};
pub use metrics::{aggregate_metrics, candidate_assets, PairStats};
