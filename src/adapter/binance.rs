//! Binance streaming adapter.
//!
//! One task per `(symbol, stream-kind)`: `<symbol>@bookTicker` feeds the
//! ticker namespace, `<symbol>@depth5@100ms` feeds the orderbook namespace
//! (best ask/bid of a 5-level snapshot, depth >= 1 per the adapter
//! contract). Reconnect-with-backoff and ping/pong handling follow the
//! project's existing low-latency Binance feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{
    ConnectedFlag, ExchangeAdapter, StreamState, StreamStateCell, RECONNECT_BACKOFF, STREAM_TIMEOUT,
};
use crate::cache::FreshnessCache;
use crate::error::AdapterError;
use crate::types::{Symbol, TopOfBook, VenueId};

const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

#[derive(Debug, Deserialize)]
struct BookTickerMsg {
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

#[derive(Debug, Deserialize)]
struct DepthMsg {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

fn lowercase_pair(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base, symbol.quote).to_lowercase()
}

pub struct BinanceAdapter {
    venue: VenueId,
    symbols: Vec<Symbol>,
    connected: Arc<ConnectedFlag>,
    states: parking_lot::RwLock<HashMap<Symbol, Arc<StreamStateCell>>>,
}

impl BinanceAdapter {
    pub fn new(symbols: Vec<Symbol>) -> Arc<Self> {
        Arc::new(Self {
            venue: VenueId::new("binance"),
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

    async fn run_ticker_stream(
        venue: VenueId,
        symbol: Symbol,
        cache: Arc<FreshnessCache>,
        cancel: CancellationToken,
        state: Arc<StreamStateCell>,
        connected: Arc<ConnectedFlag>,
    ) {
        let stream_name = format!("{}@bookTicker", lowercase_pair(&symbol));
        let url = format!("{}/{}", WS_BASE, stream_name);

        loop {
            if cancel.is_cancelled() {
                state.set(StreamState::Closed);
                return;
            }

            state.set(StreamState::Connecting);
            match tokio::time::timeout(STREAM_TIMEOUT, connect_async(&url)).await {
                Ok(Ok((ws, _))) => {
                    state.set(StreamState::Streaming);
                    connected.set(true);
                    let (mut write, mut read) = ws.split();

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
                                    warn!(error = %err, "ticker stream timed out");
                                    state.set(StreamState::Error);
                                    break;
                                };
                                let Some(msg) = msg else {
                                    state.set(StreamState::Closed);
                                    break;
                                };
                                match msg {
                                    Ok(Message::Text(text)) => {
                                        match serde_json::from_str::<BookTickerMsg>(&text) {
                                            Ok(parsed) => {
                                                Self::ingest_ticker(&venue, &symbol, &cache, parsed);
                                            }
                                            Err(e) => {
                                                let err = AdapterError::InvalidMessage {
                                                    venue: venue.to_string(),
                                                    reason: e.to_string(),
                                                };
                                                debug!(error = %err, "dropping unparseable ticker message");
                                            }
                                        }
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
                Ok(Err(e)) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: e.into(),
                    };
                    warn!(error = %err, "failed to connect ticker stream");
                    state.set(StreamState::Error);
                }
                Err(_elapsed) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: anyhow::anyhow!("connect timed out after {STREAM_TIMEOUT:?}"),
                    };
                    warn!(error = %err, "ticker stream connect timed out");
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

    async fn run_orderbook_stream(
        venue: VenueId,
        symbol: Symbol,
        cache: Arc<FreshnessCache>,
        cancel: CancellationToken,
        state: Arc<StreamStateCell>,
    ) {
        let stream_name = format!("{}@depth5@100ms", lowercase_pair(&symbol));
        let url = format!("{}/{}", WS_BASE, stream_name);

        loop {
            if cancel.is_cancelled() {
                state.set(StreamState::Closed);
                return;
            }

            state.set(StreamState::Connecting);
            match tokio::time::timeout(STREAM_TIMEOUT, connect_async(&url)).await {
                Ok(Ok((ws, _))) => {
                    state.set(StreamState::Streaming);
                    let (mut write, mut read) = ws.split();

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                let _ = write.close().await;
                                state.set(StreamState::Closed);
                                return;
                            }
                            msg = tokio::time::timeout(STREAM_TIMEOUT, read.next()) => {
                                let Ok(msg) = msg else {
                                    let err = AdapterError::TransientStream {
                                        venue: venue.to_string(),
                                        symbol: symbol.to_string(),
                                        source: anyhow::anyhow!("no message within {STREAM_TIMEOUT:?}"),
                                    };
                                    warn!(error = %err, "depth stream timed out");
                                    state.set(StreamState::Error);
                                    break;
                                };
                                let Some(msg) = msg else {
                                    state.set(StreamState::Closed);
                                    break;
                                };
                                match msg {
                                    Ok(Message::Text(text)) => {
                                        match serde_json::from_str::<DepthMsg>(&text) {
                                            Ok(parsed) => {
                                                Self::ingest_orderbook(&venue, &symbol, &cache, parsed);
                                            }
                                            Err(e) => {
                                                let err = AdapterError::InvalidMessage {
                                                    venue: venue.to_string(),
                                                    reason: e.to_string(),
                                                };
                                                debug!(error = %err, "dropping unparseable depth message");
                                            }
                                        }
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
                }
                Ok(Err(e)) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: e.into(),
                    };
                    warn!(error = %err, "failed to connect depth stream");
                    state.set(StreamState::Error);
                }
                Err(_elapsed) => {
                    let err = AdapterError::TransientStream {
                        venue: venue.to_string(),
                        symbol: symbol.to_string(),
                        source: anyhow::anyhow!("connect timed out after {STREAM_TIMEOUT:?}"),
                    };
                    warn!(error = %err, "depth stream connect timed out");
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

    fn ingest_ticker(venue: &VenueId, symbol: &Symbol, cache: &FreshnessCache, msg: BookTickerMsg) {
        let bid: Option<Decimal> = msg.bid.parse().ok();
        let ask: Option<Decimal> = msg.ask.parse().ok();
        let bid_vol: Option<Decimal> = msg.bid_qty.parse().ok();
        let ask_vol: Option<Decimal> = msg.ask_qty.parse().ok();

        if let Some(tob) =
            TopOfBook::from_raw(venue.clone(), symbol.clone(), bid, ask, bid_vol, ask_vol, now_ms())
        {
            cache.put_ticker(venue.clone(), symbol.clone(), tob);
        }
    }

    fn ingest_orderbook(venue: &VenueId, symbol: &Symbol, cache: &FreshnessCache, msg: DepthMsg) {
        let best_bid = msg.bids.first();
        let best_ask = msg.asks.first();
        let bid: Option<Decimal> = best_bid.and_then(|b| b[0].parse().ok());
        let bid_vol: Option<Decimal> = best_bid.and_then(|b| b[1].parse().ok());
        let ask: Option<Decimal> = best_ask.and_then(|a| a[0].parse().ok());
        let ask_vol: Option<Decimal> = best_ask.and_then(|a| a[1].parse().ok());

        if let Some(tob) =
            TopOfBook::from_raw(venue.clone(), symbol.clone(), bid, ask, bid_vol, ask_vol, now_ms())
        {
            cache.put_orderbook(venue.clone(), symbol.clone(), tob);
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
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

        info!(venue = %self.venue, symbols = self.symbols.len(), "starting binance adapter");

        for symbol in self.symbols.clone() {
            let ticker_state = Arc::new(StreamStateCell::default());
            let book_state = Arc::new(StreamStateCell::default());
            self.states.write().insert(symbol.clone(), ticker_state.clone());

            let venue = self.venue.clone();
            let cache_ticker = cache.clone();
            let cancel_ticker = cancel.clone();
            let connected = self.connected.clone();
            tokio::spawn(Self::run_ticker_stream(
                venue.clone(),
                symbol.clone(),
                cache_ticker,
                cancel_ticker,
                ticker_state,
                connected,
            ));

            let cache_book = cache.clone();
            let cancel_book = cancel.clone();
            tokio::spawn(Self::run_orderbook_stream(
                venue,
                symbol,
                cache_book,
                cancel_book,
                book_state,
            ));
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
    fn ingest_ticker_drops_missing_ask() {
        let cache = FreshnessCache::new(std::time::Duration::from_secs(60));
        let venue = VenueId::new("binance");
        let symbol = Symbol::new("BTC", "USDT");
        BinanceAdapter::ingest_ticker(
            &venue,
            &symbol,
            &cache,
            BookTickerMsg {
                bid: "49000".into(),
                ask: "0".into(),
                bid_qty: "1".into(),
                ask_qty: "1".into(),
            },
        );
        assert!(cache.get_ticker(&venue, &symbol).is_none());
    }

    #[test]
    fn ingest_ticker_accepts_valid_quote() {
        let cache = FreshnessCache::new(std::time::Duration::from_secs(60));
        let venue = VenueId::new("binance");
        let symbol = Symbol::new("BTC", "USDT");
        BinanceAdapter::ingest_ticker(
            &venue,
            &symbol,
            &cache,
            BookTickerMsg {
                bid: "49000".into(),
                ask: "50000".into(),
                bid_qty: "1".into(),
                ask_qty: "1".into(),
            },
        );
        assert!(cache.get_ticker(&venue, &symbol).is_some());
    }

    #[test]
    fn ingest_orderbook_uses_best_levels() {
        let cache = FreshnessCache::new(std::time::Duration::from_secs(60));
        let venue = VenueId::new("binance");
        let symbol = Symbol::new("BTC", "USDT");
        BinanceAdapter::ingest_orderbook(
            &venue,
            &symbol,
            &cache,
            DepthMsg {
                bids: vec![["49000".into(), "2".into()]],
                asks: vec![["50000".into(), "3".into()]],
            },
        );
        let tob = cache.get_orderbook(&venue, &symbol).unwrap();
        assert_eq!(tob.bid, Decimal::new(49000, 0));
        assert_eq!(tob.ask_volume, Decimal::new(3, 0));
    }
}
