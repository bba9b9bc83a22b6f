//! Arbitrage cycle detection engine
//!
//! Features:
//! - Liquidity/volatility asset filtering
//! - Log-weighted exchange graph construction
//! - Deterministic bounded cycle enumeration
//! - Per-cycle profitability tracking with retention

pub mod filter;
pub mod graph;
pub mod enumerator;
pub mod tracker;
pub mod pipeline;

pub use filter::{AllowedAssets, LiquidityFilter, MetricsSource};
pub use graph::{Edge, ExchangeGraph, GraphBuild, GraphBuilder};
pub use enumerator::{find_cycles, Cycle};
pub use tracker::{ProfitabilityTracker, TrackerStats};
pub use pipeline::{evaluate, Evaluation, Pipeline, StepOutcome};
