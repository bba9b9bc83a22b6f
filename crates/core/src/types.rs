//! Core type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Tradeable currency or token identifier (e.g. a ticker symbol)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Asset {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

impl From<String> for Asset {
    fn from(symbol: String) -> Self {
        Self(symbol)
    }
}

/// Ordered market between two assets; rates are quoted as `quote` per `base`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: Asset,
    pub quote: Asset,
}

impl TradingPair {
    pub fn new(base: impl Into<Asset>, quote: impl Into<Asset>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        &self.base == asset || &self.quote == asset
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

fn default_bidirectional() -> bool {
    true
}

/// Snapshot-scoped price data for one trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Units of quote received per unit of base sold
    pub rate: f64,
    /// Fee fraction charged per leg; `None` falls back to the configured default
    #[serde(default)]
    pub fee: Option<f64>,
    /// Units of base received per unit of quote sold, when quoted separately
    #[serde(default)]
    pub reverse_rate: Option<f64>,
    #[serde(default = "default_bidirectional")]
    pub bidirectional: bool,
}

impl Quote {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            fee: None,
            reverse_rate: None,
            bidirectional: true,
        }
    }

    /// Quote from top of book: selling base hits the bid, buying base lifts the ask
    /// A zero ask yields a non-finite reverse rate, which the graph builder rejects.
    pub fn from_book(bid: f64, ask: f64, fee: Option<f64>) -> Self {
        Self {
            rate: bid,
            fee,
            reverse_rate: Some(1.0 / ask),
            bidirectional: true,
        }
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_reverse_rate(mut self, reverse_rate: f64) -> Self {
        self.reverse_rate = Some(reverse_rate);
        self
    }

    pub fn one_way(mut self) -> Self {
        self.bidirectional = false;
        self
    }
}

/// One entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairQuote {
    #[serde(flatten)]
    pub pair: TradingPair,
    #[serde(flatten)]
    pub quote: Quote,
}

/// Point-in-time view of all quoted pairs (live or historical)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub pairs: Vec<PairQuote>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            pairs: Vec::new(),
        }
    }

    pub fn with_pair(mut self, pair: TradingPair, quote: Quote) -> Self {
        self.insert(pair, quote);
        self
    }

    /// Append a pair. Insertion order is kept; later entries win on conflicts.
    pub fn insert(&mut self, pair: TradingPair, quote: Quote) {
        self.pairs.push(PairQuote { pair, quote });
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairQuote> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Every asset mentioned by any pair
    pub fn assets(&self) -> BTreeSet<Asset> {
        self.pairs
            .iter()
            .flat_map(|p| [p.pair.base.clone(), p.pair.quote.clone()])
            .collect()
    }
}
