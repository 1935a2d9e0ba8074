//! Bybit streaming adapter.
//!
//! Bybit's v5 public spot stream is a single connection with an explicit
//! `subscribe` control frame per topic, unlike Binance's combined-stream
//! URL — the adapter trait absorbs that difference; the supervisor never
//! sees it. One task per symbol handles both the `tickers.*` and
//! `orderbook.1.*` topics over one socket, since Bybit multiplexes topics
//! on a single connection rather than one per stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{
    ConnectedFlag, ExchangeAdapter, StreamState, StreamStateCell, RECONNECT_BACKOFF, STREAM_TIMEOUT,
};
use crate::cache::FreshnessCache;
use crate::error::AdapterError;
use crate::types::{Symbol, TopOfBook, VenueId};

const WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn pair(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base, symbol.quote)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    topic: Option<String>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(rename = "bid1Price")]
    bid1_price: Option<String>,
    #[serde(rename = "ask1Price")]
    ask1_price: Option<String>,
    #[serde(rename = "bid1Size")]
    bid1_size: Option<String>,
    #[serde(rename = "ask1Size")]
    ask1_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderbookData {
    #[serde(default)]
    b: Vec<[String; 2]>,
    #[serde(default)]
    a: Vec<[String; 2]>,
}

pub struct BybitAdapter {
    venue: VenueId,
    symbols: Vec<Symbol>,
    connected: Arc<ConnectedFlag>,
    states: parking_lot::RwLock<HashMap<Symbol, Arc<StreamStateCell>>>,
}

impl BybitAdapter {
    pub fn new(symbols: Vec<Symbol>) -> Arc<Self> {
        Arc::new(Self {
            venue: VenueId::new("bybit"),
            symbols,
            connected: Arc::new(ConnectedFlag::default()),
            states: parking_lot::RwLock::new(HashMap::new()),
        })
    }

    pub fn state_of(&self, symbol: &Symbol) -> StreamState {
        self.states
            .read()
            .get(symbol)
            .map(|c| c.get())
            .unwrap_or(StreamState::Closed)
    }

    async fn run_stream(
        venue: VenueId,
        symbol: Symbol,
        cache: Arc<FreshnessCache>,
        cancel: CancellationToken,
        state: Arc<StreamStateCell>,
        connected: Arc<ConnectedFlag>,
    ) {
        let ticker_topic = format!("tickers.{}", pair(&symbol));
        let book_topic = format!("orderbook.1.{}", pair(&symbol));

        loop {
            if cancel.is_cancelled() {
                state.set(StreamState::Closed);
                return;
            }

            state.set(StreamState::Connecting);
            match tokio::time::timeout(STREAM_TIMEOUT, connect_async(WS_URL)).await {
                Ok(Ok((ws, _))) => {
                    let (mut write, mut read) = ws.split();
                    let sub = json!({ "op": "subscribe", "args": [ticker_topic, book_topic] });
                    if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                        let err = AdapterError::TransientStream {
                            venue: venue.to_string(),
                            symbol: symbol.to_string(),
                            source: e.into(),
                        };
                        warn!(error = %err, "failed to send subscribe frame");
                        state.set(StreamState::Error);
                    } else {
                        state.set(StreamState::Streaming);
                        connected.set(true);

                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    let _ = write.close().await;
                                    state.set(StreamState::Closed);
                                    connected.set(false);
                                    return;
                                }
                                msg = tokio::time::timeout(STREAM_TIMEOUT, read.next()) => {
                                    let Ok(msg) = msg else {
                                        let err = AdapterError::TransientStream {
                                            venue: venue.to_string(),
                                            symbol: symbol.to_string(),
                                            source: anyhow::anyhow!("no message within {STREAM_TIMEOUT:?}"),
                                        };
                                        warn!(error = %err, "stream timed out");
                                        state.set(StreamState::Error);
                                        break;
                                    };
                                    let Some(msg) = msg else {
                                        state.set(StreamState::Closed);
                                        break;
                                    };
                                    match msg {
                                        Ok(Message::Text(text)) => {
                                            Self::handle_envelope(&venue, &symbol, &cache, &text);
                                        }
                                        Ok(Message::Ping(payload)) => {
                                            let _ = write.send(Message::Pong(payload)).await;
                                        }
                                        Ok(Message::Close(_)) => {
                                            state.set(StreamState::Closed);
                                            break;
                                        }
                                        Ok(_) => {}
                                        Err(e) => {
                                            let err = AdapterError::TransientStream {
                                                venue: venue.to_string(),
                                                symbol: symbol.to_string(),
                                                source: e.into(),
                                            };
                                            warn!(error = %err, "transient stream error");
                                            state.set(StreamState::Error);
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                        connected.set(false);
                    }
                }
                Ok(Err(e)) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: e.into(),
                    };
                    warn!(error = %err, "failed to connect");
                    state.set(StreamState::Error);
                }
                Err(_elapsed) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: anyhow::anyhow!("connect timed out after {STREAM_TIMEOUT:?}"),
                    };
                    warn!(error = %err, "connect timed out");
                    state.set(StreamState::Error);
                }
            }

            state.set(StreamState::Backoff);
            tokio::select! {
                _ = cancel.cancelled() => {
                    state.set(StreamState::Closed);
                    return;
                }
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    fn handle_envelope(venue: &VenueId, symbol: &Symbol, cache: &FreshnessCache, text: &str) {
        let Ok(env) = serde_json::from_str::<Envelope>(text) else {
            let err = AdapterError::InvalidMessage {
                venue: venue.to_string(),
                reason: format!("envelope for {symbol} did not parse as JSON"),
            };
            debug!(error = %err, "dropping unparseable message");
            return;
        };
        let Some(topic) = env.topic else { return };
        let Some(data) = env.data else { return };

        if topic.starts_with("tickers.") {
            if let Ok(t) = serde_json::from_value::<TickerData>(data) {
                Self::ingest_ticker(venue, symbol, cache, t);
            }
        } else if topic.starts_with("orderbook.") {
            if let Ok(o) = serde_json::from_value::<OrderbookData>(data) {
                Self::ingest_orderbook(venue, symbol, cache, o);
            }
        }
    }

    fn ingest_ticker(venue: &VenueId, symbol: &Symbol, cache: &FreshnessCache, data: TickerData) {
        let bid: Option<Decimal> = data.bid1_price.and_then(|s| s.parse().ok());
        let ask: Option<Decimal> = data.ask1_price.and_then(|s| s.parse().ok());
        let bid_vol: Option<Decimal> = data.bid1_size.and_then(|s| s.parse().ok());
        let ask_vol: Option<Decimal> = data.ask1_size.and_then(|s| s.parse().ok());

        if let Some(tob) =
            TopOfBook::from_raw(venue.clone(), symbol.clone(), bid, ask, bid_vol, ask_vol, now_ms())
        {
            cache.put_ticker(venue.clone(), symbol.clone(), tob);
        }
    }

    fn ingest_orderbook(venue: &VenueId, symbol: &Symbol, cache: &FreshnessCache, data: OrderbookData) {
        let bid: Option<Decimal> = data.b.first().and_then(|b| b[0].parse().ok());
        let bid_vol: Option<Decimal> = data.b.first().and_then(|b| b[1].parse().ok());
        let ask: Option<Decimal> = data.a.first().and_then(|a| a[0].parse().ok());
        let ask_vol: Option<Decimal> = data.a.first().and_then(|a| a[1].parse().ok());

        if let Some(tob) =
            TopOfBook::from_raw(venue.clone(), symbol.clone(), bid, ask, bid_vol, ask_vol, now_ms())
        {
            cache.put_orderbook(venue.clone(), symbol.clone(), tob);
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.symbols.clone()
    }

    async fn spawn(self: Arc<Self>, cache: Arc<FreshnessCache>, cancel: CancellationToken) {
        if self.symbols.is_empty() {
            warn!(venue = %self.venue, "no usable symbols; adapter will not start any streams");
            return;
        }

        info!(venue = %self.venue, symbols = self.symbols.len(), "starting bybit adapter");

        for symbol in self.symbols.clone() {
            let state = Arc::new(StreamStateCell::default());
            self.states.write().insert(symbol.clone(), state.clone());

            let venue = self.venue.clone();
            let cache = cache.clone();
            let cancel = cancel.clone();
            let connected = self.connected.clone();
            tokio::spawn(Self::run_stream(venue, symbol, cache, cancel, state, connected));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_ticker_requires_both_sides() {
        let cache = FreshnessCache::new(std::time::Duration::from_secs(60));
        let venue = VenueId::new("bybit");
        let symbol = Symbol::new("BTC", "USDT");
        BybitAdapter::ingest_ticker(
            &venue,
            &symbol,
            &cache,
            TickerData {
                bid1_price: Some("49000".into()),
                ask1_price: None,
                bid1_size: None,
                ask1_size: None,
            },
        );
        assert!(cache.get_ticker(&venue, &symbol).is_none());
    }

    #[test]
    fn envelope_routes_ticker_topic() {
        let cache = FreshnessCache::new(std::time::Duration::from_secs(60));
        let venue = VenueId::new("bybit");
        let symbol = Symbol::new("BTC", "USDT");
        let text = serde_json::json!({
            "topic": "tickers.BTCUSDT",
            "data": { "bid1Price": "49000", "ask1Price": "50000", "bid1Size": "1", "ask1Size": "1" }
        })
        .to_string();
        BybitAdapter::handle_envelope(&venue, &symbol, &cache, &text);
        assert!(cache.get_ticker(&venue, &symbol).is_some());
    }
}
