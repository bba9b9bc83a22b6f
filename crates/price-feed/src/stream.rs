//! Binance book ticker WebSocket feed into a `QuoteBook`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use arb_core::{PriceFeedError, PriceFeedResult, Quote, TradingPair};

use crate::binance::de_f64;
use crate::state::QuoteBook;

pub const BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Streams accepted on a single connection
pub const MAX_STREAMS: usize = 1024;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnects: u32,
    /// How often stale quotes are dropped from the book
    pub cleanup_interval: Duration,
    pub fee: Option<f64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: BINANCE_STREAM_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
            max_reconnects: 10,
            cleanup_interval: Duration::from_secs(10),
            fee: None,
        }
    }
}

/// One `<symbol>@bookTicker` event
#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", deserialize_with = "de_f64")]
    pub bid: f64,
    #[serde(rename = "a", deserialize_with = "de_f64")]
    pub ask: f64,
}

/// SUBSCRIBE request for the book ticker streams of `symbols`
pub fn subscribe_message(symbols: &[String]) -> String {
    let params: Vec<String> = symbols
        .iter()
        .map(|symbol| format!("{}@bookTicker", symbol.to_lowercase()))
        .collect();

    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": params,
        "id": 1,
    })
    .to_string()
}

/// Decode one text frame.
///
/// Subscription acks, unknown symbols and empty book sides yield `Ok(None)`.
pub fn parse_frame(
    text: &str,
    symbols: &HashMap<String, TradingPair>,
    fee: Option<f64>,
) -> PriceFeedResult<Option<(TradingPair, Quote)>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| PriceFeedError::InvalidMessage(e.to_string()))?;

    if let Some(err) = value.get("error") {
        return Err(PriceFeedError::InvalidMessage(err.to_string()));
    }
    if value.get("result").is_some() {
        return Ok(None);
    }

    let event: BookTickerEvent =
        serde_json::from_value(value).map_err(|e| PriceFeedError::InvalidMessage(e.to_string()))?;

    let Some(pair) = symbols.get(&event.symbol) else {
        return Ok(None);
    };
    if event.bid <= 0.0 || event.ask <= 0.0 {
        return Ok(None);
    }

    Ok(Some((pair.clone(), Quote::from_book(event.bid, event.ask, fee))))
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> PriceFeedError {
    PriceFeedError::ConnectionFailed(e.to_string())
}

/// Keeps a `QuoteBook` current from the exchange's book ticker stream
pub struct BookTickerStream {
    config: StreamConfig,
    symbols: Arc<HashMap<String, TradingPair>>,
    book: Arc<QuoteBook>,
}

impl BookTickerStream {
    pub fn new(
        config: StreamConfig,
        symbols: Arc<HashMap<String, TradingPair>>,
        book: Arc<QuoteBook>,
    ) -> Self {
        Self {
            config,
            symbols,
            book,
        }
    }

    pub fn book(&self) -> Arc<QuoteBook> {
        Arc::clone(&self.book)
    }

    /// Run until the reconnect budget is spent
    pub async fn run(&self) -> PriceFeedResult<()> {
        if self.symbols.is_empty() {
            return Err(PriceFeedError::DataUnavailable(
                "no symbols to subscribe".to_string(),
            ));
        }

        let mut reconnects = 0u32;

        loop {
            match self.connect_and_listen().await {
                Ok(()) => {
                    info!("Book ticker stream closed, reconnecting");
                    reconnects = 0;
                }
                Err(e) => {
                    reconnects += 1;
                    warn!(
                        "Book ticker stream error (attempt {}/{}): {}",
                        reconnects, self.config.max_reconnects, e
                    );

                    if reconnects >= self.config.max_reconnects {
                        error!("Max reconnection attempts reached");
                        return Err(e);
                    }
                }
            }

            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn connect_and_listen(&self) -> PriceFeedResult<()> {
        info!("Connecting to {}", self.config.url);

        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(ws_error)?;
        let (mut write, mut read) = ws_stream.split();

        let mut names: Vec<String> = self.symbols.keys().cloned().collect();
        names.sort();
        if names.len() > MAX_STREAMS {
            warn!(
                "{} symbols requested, subscribing to the first {}",
                names.len(),
                MAX_STREAMS
            );
            names.truncate(MAX_STREAMS);
        }

        write
            .send(Message::Text(subscribe_message(&names)))
            .await
            .map_err(ws_error)?;
        info!("Subscribed to {} book ticker streams", names.len());

        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_frame(&text, &self.symbols, self.config.fee) {
                            Ok(Some((pair, quote))) => self.book.update(pair, quote),
                            Ok(None) => {}
                            Err(e) => warn!("Skipping frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await.map_err(ws_error)?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return Err(ws_error(e));
                    }
                },
                _ = cleanup.tick() => {
                    let removed = self.book.cleanup();
                    if removed > 0 {
                        debug!("Dropped {} stale quotes", removed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> HashMap<String, TradingPair> {
        HashMap::from([
            ("BTCUSDT".to_string(), TradingPair::new("BTC", "USDT")),
            ("ETHBTC".to_string(), TradingPair::new("ETH", "BTC")),
        ])
    }

    #[test]
    fn test_subscribe_message() {
        let message = subscribe_message(&["BTCUSDT".to_string(), "ETHBTC".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();

        assert_eq!(value["method"], "SUBSCRIBE");
        assert_eq!(value["params"][0], "btcusdt@bookTicker");
        assert_eq!(value["params"][1], "ethbtc@bookTicker");
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_parse_book_ticker_frame() {
        let frame = r#"{"u":400900217,"s":"BTCUSDT","b":"42000.10","B":"1.5","a":"42000.50","A":"2.0"}"#;
        let (pair, quote) = parse_frame(frame, &symbols(), Some(0.001)).unwrap().unwrap();

        assert_eq!(pair, TradingPair::new("BTC", "USDT"));
        assert_eq!(quote.rate, 42_000.10);
        assert_eq!(quote.reverse_rate, Some(1.0 / 42_000.50));
        assert_eq!(quote.fee, Some(0.001));
    }

    #[test]
    fn test_frames_without_quotes_ignored() {
        let symbols = symbols();

        let ack = r#"{"result":null,"id":1}"#;
        assert!(parse_frame(ack, &symbols, None).unwrap().is_none());

        let unknown = r#"{"u":1,"s":"DOGEUSDT","b":"0.08","B":"1","a":"0.081","A":"1"}"#;
        assert!(parse_frame(unknown, &symbols, None).unwrap().is_none());

        let empty_side = r#"{"u":1,"s":"ETHBTC","b":"0.00000000","B":"0","a":"0.052","A":"1"}"#;
        assert!(parse_frame(empty_side, &symbols, None).unwrap().is_none());
    }

    #[test]
    fn test_bad_frames_rejected() {
        let symbols = symbols();

        let error = r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#;
        assert!(matches!(
            parse_frame(error, &symbols, None),
            Err(PriceFeedError::InvalidMessage(_))
        ));

        let bad_price = r#"{"u":1,"s":"BTCUSDT","b":"abc","B":"1","a":"1","A":"1"}"#;
        assert!(parse_frame(bad_price, &symbols, None).is_err());
        assert!(parse_frame("not json", &symbols, None).is_err());
    }

    #[tokio::test]
    async fn test_stream_gives_up_after_max_reconnects() {
        let config = StreamConfig {
            url: "ws://127.0.0.1:1".to_string(),
            reconnect_delay: Duration::from_millis(1),
            max_reconnects: 2,
            ..Default::default()
        };
        let stream = BookTickerStream::new(config, Arc::new(symbols()), Arc::new(QuoteBook::default()));

        let result = stream.run().await;
        assert!(matches!(result, Err(PriceFeedError::ConnectionFailed(_))));
        assert!(stream.book().is_empty());
    }

    #[tokio::test]
    async fn test_stream_requires_symbols() {
        let stream = BookTickerStream::new(
            StreamConfig::default(),
            Arc::new(HashMap::new()),
            Arc::new(QuoteBook::default()),
        );

        assert!(matches!(
            stream.run().await,
            Err(PriceFeedError::DataUnavailable(_))
        ));
    }
}
