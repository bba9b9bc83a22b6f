//! Binance spot REST client (live snapshot source)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use arb_core::{PriceFeedError, PriceFeedResult, Quote, Snapshot, TradingPair};

use crate::history::SnapshotHistory;
use crate::metrics::PairStats;
use crate::provider::SnapshotProvider;

pub const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Maximum klines per request
const KLINE_LIMIT: usize = 1000;

/// Binance encodes decimals as strings
pub(crate) fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub bid_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub ask_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTicker {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub price_change_percent: f64,
    #[serde(deserialize_with = "de_f64")]
    pub quote_volume: f64,
}

/// Symbol -> pair for every symbol currently trading
pub fn trading_pairs(info: &ExchangeInfo) -> HashMap<String, TradingPair> {
    info.symbols
        .iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| {
            (
                s.symbol.clone(),
                TradingPair::new(s.base_asset.as_str(), s.quote_asset.as_str()),
            )
        })
        .collect()
}

/// Build a snapshot from top-of-book tickers.
///
/// Tickers for unknown symbols or with an empty side of the book are skipped.
pub fn snapshot_from_tickers(
    pairs: &HashMap<String, TradingPair>,
    tickers: &[BookTicker],
    fee: Option<f64>,
) -> Snapshot {
    let mut snapshot = Snapshot::new(Utc::now());
    let mut skipped = 0usize;

    for ticker in tickers {
        let Some(pair) = pairs.get(&ticker.symbol) else {
            skipped += 1;
            continue;
        };
        if ticker.bid_price <= 0.0 || ticker.ask_price <= 0.0 {
            skipped += 1;
            continue;
        }
        snapshot.insert(
            pair.clone(),
            Quote::from_book(ticker.bid_price, ticker.ask_price, fee),
        );
    }

    debug!(
        "Snapshot from {} tickers: {} pairs, {} skipped",
        tickers.len(),
        snapshot.len(),
        skipped
    );
    snapshot
}

/// Join 24h tickers with the symbol table
pub fn pair_stats(pairs: &HashMap<String, TradingPair>, tickers: &[DailyTicker]) -> Vec<PairStats> {
    tickers
        .iter()
        .filter_map(|t| {
            pairs.get(&t.symbol).map(|pair| PairStats {
                pair: pair.clone(),
                quote_volume: t.quote_volume,
                price_change_pct: t.price_change_percent,
            })
        })
        .collect()
}

/// One candle, reduced to what snapshot alignment needs
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub close: f64,
}

/// Klines arrive as positional arrays: `[open_time_ms, open, high, low, close, ...]`
pub fn parse_klines(rows: &[serde_json::Value]) -> PriceFeedResult<Vec<Kline>> {
    rows.iter()
        .map(|row| {
            let open_time = row
                .get(0)
                .and_then(serde_json::Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            let close = row
                .get(4)
                .and_then(serde_json::Value::as_str)
                .and_then(|raw| raw.parse::<f64>().ok());

            match (open_time, close) {
                (Some(open_time), Some(close)) => Ok(Kline { open_time, close }),
                _ => Err(PriceFeedError::InvalidMessage(format!("malformed kline: {}", row))),
            }
        })
        .collect()
}

/// Align per-pair candles by open time into snapshots of close prices.
///
/// Each snapshot carries only the pairs that have a candle at that time. Close
/// prices have no book sides, so reverse legs are derived.
pub fn history_from_klines(series: &[(TradingPair, Vec<Kline>)], fee: Option<f64>) -> SnapshotHistory {
    let mut aligned: BTreeMap<DateTime<Utc>, Snapshot> = BTreeMap::new();

    for (pair, klines) in series {
        for kline in klines {
            let quote = match fee {
                Some(fee) => Quote::new(kline.close).with_fee(fee),
                None => Quote::new(kline.close),
            };
            aligned
                .entry(kline.open_time)
                .or_insert_with(|| Snapshot::new(kline.open_time))
                .insert(pair.clone(), quote);
        }
    }

    aligned.into_values().collect()
}

fn request_error(e: reqwest::Error) -> PriceFeedError {
    if e.is_timeout() {
        PriceFeedError::Timeout
    } else if e.is_decode() {
        PriceFeedError::InvalidMessage(e.to_string())
    } else {
        PriceFeedError::ConnectionFailed(e.to_string())
    }
}

/// Public market data client
pub struct BinanceClient {
    client: Client,
    base_url: String,
    fee: Option<f64>,
    symbols: RwLock<Option<Arc<HashMap<String, TradingPair>>>>,
}

impl BinanceClient {
    pub fn new(timeout: Duration) -> PriceFeedResult<Self> {
        Self::with_base_url(BINANCE_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> PriceFeedResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| PriceFeedError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            fee: None,
            symbols: RwLock::new(None),
        })
    }

    /// Fee attached to every quote; `None` defers to the engine's default
    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = Some(fee);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> PriceFeedResult<T> {
        self.get_with_query(path, &[]).await
    }

    async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> PriceFeedResult<T> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            warn!("GET {} rate limited ({})", path, status);
            return Err(PriceFeedError::RateLimited);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PriceFeedError::ConnectionFailed(format!(
                "GET {} {}: {}",
                path, status, text
            )));
        }

        resp.json::<T>().await.map_err(request_error)
    }

    pub async fn exchange_info(&self) -> PriceFeedResult<ExchangeInfo> {
        self.get("/exchangeInfo").await
    }

    pub async fn book_tickers(&self) -> PriceFeedResult<Vec<BookTicker>> {
        self.get("/ticker/bookTicker").await
    }

    pub async fn daily_tickers(&self) -> PriceFeedResult<Vec<DailyTicker>> {
        self.get("/ticker/24hr").await
    }

    /// Every `interval` kline of `symbol` opening within `[start, end]`, paging as needed
    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PriceFeedResult<Vec<Kline>> {
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut klines = Vec::new();

        while cursor <= end_ms {
            let rows: Vec<serde_json::Value> = self
                .get_with_query(
                    "/klines",
                    &[
                        ("symbol", symbol.to_string()),
                        ("interval", interval.to_string()),
                        ("startTime", cursor.to_string()),
                        ("endTime", end_ms.to_string()),
                        ("limit", KLINE_LIMIT.to_string()),
                    ],
                )
                .await?;
            let page = parse_klines(&rows)?;

            let Some(last) = page.last() else {
                break;
            };
            cursor = last.open_time.timestamp_millis() + 1;
            let full = page.len() >= KLINE_LIMIT;
            klines.extend(page);
            if !full {
                break;
            }
        }

        debug!("{}: {} {} klines", symbol, klines.len(), interval);
        Ok(klines)
    }

    /// Historical snapshots for `symbols`, aligned by kline open time.
    ///
    /// A symbol whose klines cannot be fetched is skipped; rate limiting aborts.
    pub async fn kline_history(
        &self,
        symbols: &[String],
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PriceFeedResult<SnapshotHistory> {
        let table = self.symbols().await?;
        let mut series = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let Some(pair) = table.get(symbol) else {
                warn!("Unknown symbol {}, skipping", symbol);
                continue;
            };
            match self.klines(symbol, interval, start, end).await {
                Ok(klines) => {
                    info!("Fetched {} klines for {}", klines.len(), symbol);
                    series.push((pair.clone(), klines));
                }
                Err(PriceFeedError::RateLimited) => return Err(PriceFeedError::RateLimited),
                Err(e) => warn!("Skipping {}: {}", symbol, e),
            }
        }

        let history = history_from_klines(&series, self.fee);
        if history.is_empty() {
            return Err(PriceFeedError::DataUnavailable(format!(
                "no klines between {} and {}",
                start, end
            )));
        }
        Ok(history)
    }

    /// Trading symbol table, fetched once and cached
    pub async fn symbols(&self) -> PriceFeedResult<Arc<HashMap<String, TradingPair>>> {
        let cached = self.symbols.read().clone();
        if let Some(symbols) = cached {
            return Ok(symbols);
        }

        let info = self.exchange_info().await?;
        let symbols = Arc::new(trading_pairs(&info));
        info!(
            "Loaded {} trading symbols of {} listed",
            symbols.len(),
            info.symbols.len()
        );
        *self.symbols.write() = Some(Arc::clone(&symbols));
        Ok(symbols)
    }

    /// Forget the cached symbol table so the next call reloads it
    pub fn invalidate_symbols(&self) {
        *self.symbols.write() = None;
    }

    /// 24h statistics for every trading pair
    pub async fn pair_stats(&self) -> PriceFeedResult<Vec<PairStats>> {
        let (symbols, tickers) = tokio::try_join!(self.symbols(), self.daily_tickers())?;
        Ok(pair_stats(&symbols, &tickers))
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn current_snapshot(&self) -> PriceFeedResult<Snapshot> {
        let (symbols, tickers) = tokio::try_join!(self.symbols(), self.book_tickers())?;
        let snapshot = snapshot_from_tickers(&symbols, &tickers, self.fee);

        if snapshot.is_empty() {
            return Err(PriceFeedError::DataUnavailable(
                "no tradeable book tickers".to_string(),
            ));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXCHANGE_INFO: &str = r#"{
        "timezone": "UTC",
        "symbols": [
            {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT", "filters": []},
            {"symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC", "filters": []},
            {"symbol": "OLDUSDT", "status": "BREAK", "baseAsset": "OLD", "quoteAsset": "USDT", "filters": []}
        ]
    }"#;

    const BOOK_TICKERS: &str = r#"[
        {"symbol": "BTCUSDT", "bidPrice": "40000.00", "bidQty": "1.5", "askPrice": "40010.00", "askQty": "2.0"},
        {"symbol": "ETHBTC", "bidPrice": "0.00000000", "bidQty": "0", "askPrice": "0.05100000", "askQty": "3"},
        {"symbol": "OLDUSDT", "bidPrice": "1.0", "bidQty": "1", "askPrice": "1.1", "askQty": "1"}
    ]"#;

    const DAILY_TICKERS: &str = r#"[
        {"symbol": "BTCUSDT", "priceChangePercent": "-2.50", "quoteVolume": "123456.78", "volume": "3.1"},
        {"symbol": "OLDUSDT", "priceChangePercent": "0.00", "quoteVolume": "0.00", "volume": "0"}
    ]"#;

    fn pairs() -> HashMap<String, TradingPair> {
        let info: ExchangeInfo = serde_json::from_str(EXCHANGE_INFO).unwrap();
        trading_pairs(&info)
    }

    #[test]
    fn test_only_trading_symbols() {
        let pairs = pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["ETHBTC"], TradingPair::new("ETH", "BTC"));
        assert!(!pairs.contains_key("OLDUSDT"));
    }

    #[test]
    fn test_snapshot_from_book_tickers() {
        let tickers: Vec<BookTicker> = serde_json::from_str(BOOK_TICKERS).unwrap();
        let snapshot = snapshot_from_tickers(&pairs(), &tickers, Some(0.001));

        // ETHBTC has an empty bid, OLDUSDT is not trading
        assert_eq!(snapshot.len(), 1);
        let entry = &snapshot.pairs[0];
        assert_eq!(entry.pair, TradingPair::new("BTC", "USDT"));
        assert_eq!(entry.quote.rate, 40_000.0);
        assert!((entry.quote.reverse_rate.unwrap() - 1.0 / 40_010.0).abs() < 1e-15);
        assert_eq!(entry.quote.fee, Some(0.001));
    }

    #[test]
    fn test_pair_stats_join() {
        let tickers: Vec<DailyTicker> = serde_json::from_str(DAILY_TICKERS).unwrap();
        let stats = pair_stats(&pairs(), &tickers);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].quote_volume, 123_456.78);
        assert_eq!(stats[0].price_change_pct, -2.5);
    }

    const KLINES: &str = r#"[
        [1704067200000, "42000.0", "42100.0", "41900.0", "42050.5", "12.3", 1704067259999, "517000.0", 120, "6.1", "256000.0", "0"],
        [1704067260000, "42050.5", "42060.0", "42000.0", "42010.0", "8.7", 1704067319999, "365000.0", 95, "4.0", "168000.0", "0"]
    ]"#;

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_704_067_200_000 + m * 60_000).unwrap()
    }

    #[test]
    fn test_parse_klines() {
        let rows: Vec<serde_json::Value> = serde_json::from_str(KLINES).unwrap();
        let klines = parse_klines(&rows).unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, minute(0));
        assert_eq!(klines[0].close, 42_050.5);
        assert_eq!(klines[1].open_time, minute(1));

        let bad: Vec<serde_json::Value> = serde_json::from_str(r#"[[1704067200000, "1", "1", "1"]]"#).unwrap();
        assert!(matches!(parse_klines(&bad), Err(PriceFeedError::InvalidMessage(_))));
    }

    #[test]
    fn test_klines_aligned_by_open_time() {
        let btc = TradingPair::new("BTC", "USDT");
        let eth = TradingPair::new("ETH", "USDT");
        let series = vec![
            (
                btc.clone(),
                vec![
                    Kline { open_time: minute(0), close: 42_000.0 },
                    Kline { open_time: minute(1), close: 42_010.0 },
                ],
            ),
            (eth.clone(), vec![Kline { open_time: minute(1), close: 2_200.0 }]),
        ];

        let history = history_from_klines(&series, Some(0.001));
        assert_eq!(history.len(), 2);
        assert_eq!(history.first_timestamp(), Some(minute(0)));

        let snapshots: Vec<&Snapshot> = history.iter().collect();
        assert_eq!(snapshots[0].len(), 1);
        assert_eq!(snapshots[1].len(), 2);
        assert_eq!(snapshots[1].pairs[0].pair, btc);
        assert_eq!(snapshots[1].pairs[1].pair, eth);
        assert_eq!(snapshots[1].pairs[1].quote.fee, Some(0.001));
        assert!(snapshots[1].pairs[1].quote.reverse_rate.is_none());
    }

    #[test]
    fn test_bad_decimal_rejected() {
        let bad = r#"[{"symbol": "BTCUSDT", "bidPrice": "abc", "askPrice": "1"}]"#;
        assert!(serde_json::from_str::<Vec<BookTicker>>(bad).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_fast() {
        let client =
            BinanceClient::with_base_url("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = client.current_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            PriceFeedError::ConnectionFailed(_) | PriceFeedError::Timeout
        ));
    }
}
