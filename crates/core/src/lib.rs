//! Core types and utilities for the arbitrage graph engine
//!
//! This crate provides shared types used across all components:
//! - Asset, trading pair, quote and snapshot definitions
//! - Cycle identity and profitability records
//! - Liquidity metrics and asset lists
//! - Engine configuration and error taxonomy

pub mod types;
pub mod opportunities;
pub mod liquidity;
pub mod config;
pub mod errors;

pub use types::*;
pub use opportunities::*;
pub use liquidity::*;
pub use config::*;
pub use errors::*;
