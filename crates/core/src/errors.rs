//! Error types

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Asset, CycleId, TradingPair};

/// Core error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A single pair carried unusable data; the pair is dropped, the pass continues
    #[error("Invalid snapshot data for {pair}: {reason}")]
    InvalidSnapshot { pair: TradingPair, reason: String },

    #[error("No snapshot available for {at}")]
    DataUnavailable { at: DateTime<Utc> },

    /// Filtering left nothing reachable from the base asset
    #[error("Graph is empty for base asset {base}")]
    GraphEmpty { base: Asset },

    #[error("Out-of-order observation for {cycle}: {got} is before {last}")]
    OutOfOrder {
        cycle: CycleId,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Price feed errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceFeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("No data available: {0}")]
    DataUnavailable(String),
}

impl From<CoreError> for PriceFeedError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::DataUnavailable { at } => PriceFeedError::DataUnavailable(at.to_rfc3339()),
            other => PriceFeedError::InvalidMessage(other.to_string()),
        }
    }
}

/// Monitoring errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    #[error("Snapshot source unreachable after {attempts} consecutive failures: {last_error}")]
    SourceUnreachable {
        attempts: u32,
        last_error: PriceFeedError,
    },

    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] CoreError),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type PriceFeedResult<T> = Result<T, PriceFeedError>;
pub type MonitorResult<T> = Result<T, MonitorError>;
