//! Spatial Finder: pairwise CEX-CEX scan over the freshness cache.
//!
//! For every pair configured on more than one venue, every ordered
//! `(buy, sell)` combination is priced and fee-adjusted, and a ranked,
//! volume-annotated opportunity list comes out the other end.

use rust_decimal::Decimal;

use crate::cache::FreshnessCache;
use crate::commission::CommissionTable;
use crate::error::FinderError;
use crate::types::{FeeSide, OpportunitySpatial, Symbol, TopOfBook, VenueId};

use super::{distinct_symbols, panic_message, venues_for_symbol};

pub struct SpatialFinder {
    commissions: std::sync::Arc<CommissionTable>,
    cache: std::sync::Arc<FreshnessCache>,
    venues: Vec<VenueId>,
    min_profit_percent: Decimal,
}

/// The ask side used to price a buy leg, with its disclosed volume (zero
/// when falling back from orderbook to ticker).
struct AskSide {
    ask: Decimal,
    ask_volume: Decimal,
}

/// The bid side used to price a sell leg, with its disclosed volume.
struct BidSide {
    bid: Decimal,
    bid_volume: Decimal,
}

fn resolve_ask(cache: &FreshnessCache, venue: &VenueId, symbol: &Symbol) -> Option<AskSide> {
    if let Some(tob) = cache.get_orderbook(venue, symbol) {
        return Some(AskSide { ask: tob.ask, ask_volume: tob.ask_volume });
    }
    cache
        .get_ticker(venue, symbol)
        .map(|tob: TopOfBook| AskSide { ask: tob.ask, ask_volume: Decimal::ZERO })
}

fn resolve_bid(cache: &FreshnessCache, venue: &VenueId, symbol: &Symbol) -> Option<BidSide> {
    if let Some(tob) = cache.get_orderbook(venue, symbol) {
        return Some(BidSide { bid: tob.bid, bid_volume: tob.bid_volume });
    }
    cache
        .get_ticker(venue, symbol)
        .map(|tob: TopOfBook| BidSide { bid: tob.bid, bid_volume: Decimal::ZERO })
}

impl SpatialFinder {
    pub fn new(
        commissions: std::sync::Arc<CommissionTable>,
        cache: std::sync::Arc<FreshnessCache>,
        venues: Vec<VenueId>,
        min_profit_percent: Decimal,
    ) -> Self {
        Self { commissions, cache, venues, min_profit_percent }
    }

    /// Runs one scan, catching any panic raised by the computation itself
    /// (e.g. a decimal overflow) and reporting it as a
    /// [`FinderError::Spatial`] instead of letting it propagate — per
    /// spec.md §7, a failed iteration returns an empty list rather than
    /// taking the publisher loop down with it.
    pub fn find(&self) -> Result<Vec<OpportunitySpatial>, FinderError> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.find_inner()))
            .map_err(|payload| FinderError::Spatial(panic_message(payload)))
    }

    /// Deterministic: equal-profit opportunities tie-break on
    /// `(pair, buy_venue, sell_venue)` lexicographically.
    fn find_inner(&self) -> Vec<OpportunitySpatial> {
        let mut opportunities = Vec::new();

        for symbol in distinct_symbols(&self.commissions, &self.venues) {
            let candidates = venues_for_symbol(&self.commissions, &self.venues, &symbol);

            for buy_venue in &candidates {
                for sell_venue in &candidates {
                    if buy_venue == sell_venue {
                        continue;
                    }

                    let Some(buy) = resolve_ask(&self.cache, buy_venue, &symbol) else { continue };
                    let Some(sell) = resolve_bid(&self.cache, sell_venue, &symbol) else { continue };

                    if buy.ask <= Decimal::ZERO || sell.bid <= Decimal::ZERO {
                        continue;
                    }

                    let f_buy = self.commissions.get_fee(buy_venue, &symbol, FeeSide::TakerBuy);
                    let f_sell = self.commissions.get_fee(sell_venue, &symbol, FeeSide::TakerSell);

                    let cost = buy.ask * (Decimal::ONE + f_buy);
                    let revenue = sell.bid * (Decimal::ONE - f_sell);

                    if revenue <= cost {
                        continue;
                    }

                    let profit_percent = (revenue - cost) / cost * Decimal::ONE_HUNDRED;
                    if profit_percent < self.min_profit_percent {
                        continue;
                    }

                    let volume = buy.ask_volume.min(sell.bid_volume);
                    let volume_usd = if volume > Decimal::ZERO {
                        Some(volume * (buy.ask + sell.bid) / Decimal::TWO)
                    } else {
                        None
                    };

                    opportunities.push(OpportunitySpatial {
                        pair: symbol.to_string(),
                        buy_venue: buy_venue.to_uppercase(),
                        sell_venue: sell_venue.to_uppercase(),
                        buy_price: buy.ask,
                        sell_price: sell.bid,
                        profit_percent,
                        volume_usd,
                    });
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.profit_percent.cmp(&a.profit_percent).then_with(|| {
                (&a.pair, &a.buy_venue, &a.sell_venue).cmp(&(&b.pair, &b.buy_venue, &b.sell_venue))
            })
        });

        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeSide;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<CommissionTable>, Arc<FreshnessCache>, Symbol, VenueId, VenueId) {
        let mut table = CommissionTable::empty();
        let binance = VenueId::new("binance");
        let bybit = VenueId::new("bybit");
        let sym = Symbol::new("BTC", "USDT");
        table.insert_for_test(&binance, &sym, FeeSide::TakerBuy, "0%");
        table.insert_for_test(&bybit, &sym, FeeSide::TakerBuy, "0%");
        let cache = FreshnessCache::new(Duration::from_secs(60));
        (Arc::new(table), Arc::new(cache), sym, binance, bybit)
    }

    fn tob(venue: &VenueId, sym: &Symbol, bid: i64, bid_vol: i64, ask: i64, ask_vol: i64) -> TopOfBook {
        TopOfBook::from_raw(
            venue.clone(),
            sym.clone(),
            Some(Decimal::new(bid, 0)),
            Some(Decimal::new(ask, 0)),
            Some(Decimal::new(bid_vol, 0)),
            Some(Decimal::new(ask_vol, 0)),
            0,
        )
        .unwrap()
    }

    /// Zero fees, clear spread: the opportunity is found and ranked first.
    #[test]
    fn spatial_found_with_zero_fees() {
        let (table, cache, sym, binance, bybit) = setup();
        cache.put_orderbook(binance.clone(), sym.clone(), tob(&binance, &sym, 49000, 1, 50000, 1));
        cache.put_orderbook(bybit.clone(), sym.clone(), tob(&bybit, &sym, 51000, 1, 48000, 1));

        let finder = SpatialFinder::new(table, cache, vec![binance, bybit], Decimal::new(1, 2));
        let found = finder.find().unwrap();

        let best = found.iter().find(|o| o.buy_venue == "BYBIT" && o.sell_venue == "BINANCE").unwrap();
        assert_eq!(best.buy_price, Decimal::new(48000, 0));
        assert_eq!(best.sell_price, Decimal::new(49000, 0));
        assert!(best.profit_percent > Decimal::new(208, 2) && best.profit_percent < Decimal::new(209, 2));
        assert_eq!(best.volume_usd, Some(Decimal::new(48500, 0)));
    }

    /// Fees erase the opportunity once they're high enough.
    #[test]
    fn spatial_not_found_under_high_fees() {
        let mut table = CommissionTable::empty();
        let binance = VenueId::new("binance");
        let bybit = VenueId::new("bybit");
        let sym = Symbol::new("BTC", "USDT");
        for venue in [&binance, &bybit] {
            table.insert_for_test(venue, &sym, FeeSide::TakerBuy, "2%");
            table.insert_for_test(venue, &sym, FeeSide::TakerSell, "2%");
        }
        let cache = FreshnessCache::new(Duration::from_secs(60));
        cache.put_orderbook(binance.clone(), sym.clone(), tob(&binance, &sym, 49000, 1, 50000, 1));
        cache.put_orderbook(bybit.clone(), sym.clone(), tob(&bybit, &sym, 51000, 1, 48000, 1));

        let finder =
            SpatialFinder::new(Arc::new(table), Arc::new(cache), vec![binance, bybit], Decimal::new(1, 2));
        let found = finder.find().unwrap();
        assert!(found.iter().all(|o| !(o.buy_venue == "BYBIT" && o.sell_venue == "BINANCE")));
    }

    /// Missing orderbook falls back to ticker; volume is undisclosed.
    #[test]
    fn missing_orderbook_falls_back_to_ticker_with_null_volume() {
        let (table, cache, sym, binance, bybit) = setup();
        cache.put_ticker(binance.clone(), sym.clone(), tob(&binance, &sym, 49000, 0, 50000, 0));
        cache.put_orderbook(bybit.clone(), sym.clone(), tob(&bybit, &sym, 51000, 1, 48000, 1));

        let finder = SpatialFinder::new(table, cache, vec![binance, bybit], Decimal::new(1, 2));
        let found = finder.find().unwrap();
        let opp = found.iter().find(|o| o.buy_venue == "BYBIT" && o.sell_venue == "BINANCE").unwrap();
        assert_eq!(opp.volume_usd, None);
    }

    #[test]
    fn no_opportunity_below_min_profit_percent() {
        let (table, cache, sym, binance, bybit) = setup();
        cache.put_orderbook(binance.clone(), sym.clone(), tob(&binance, &sym, 49999, 1, 50000, 1));
        cache.put_orderbook(bybit.clone(), sym.clone(), tob(&bybit, &sym, 50000, 1, 49999, 1));

        let finder = SpatialFinder::new(table, cache, vec![binance, bybit], Decimal::new(50, 0));
        assert!(finder.find().unwrap().is_empty());
    }
}
