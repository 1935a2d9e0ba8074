//! Cyclic Finder: negative-cycle detection on a logarithmic rate graph.
//!
//! Builds a flat edge list rather than an adjacency map — Bellman-Ford
//! relaxes edges in arbitrary order and a linear scan suits that better than
//! map traversal. Graph construction stays in `Decimal`; only the
//! relaxation itself runs in `f64`, converting back to `Decimal` at the
//! profit boundary.

use std::collections::{HashMap, HashSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::cache::FreshnessCache;
use crate::commission::CommissionTable;
use crate::error::FinderError;
use crate::finder::panic_message;
use crate::types::{CycleLeg, CycleSide, FeeSide, OpportunityCyclic, Symbol, VenueId};

/// One directed conversion edge: trading `pair` on `venue` moves value from
/// `from` currency to `to` currency at cost `weight = -ln(rate)`.
struct Edge {
    venue: VenueId,
    pair: Symbol,
    side: CycleSide,
    from: String,
    to: String,
    weight: f64,
    price: Decimal,
    volume: Decimal,
}

pub struct CyclicFinder {
    commissions: std::sync::Arc<CommissionTable>,
    cache: std::sync::Arc<FreshnessCache>,
    venues: Vec<VenueId>,
    min_profit_percent: Decimal,
}

impl CyclicFinder {
    pub fn new(
        commissions: std::sync::Arc<CommissionTable>,
        cache: std::sync::Arc<FreshnessCache>,
        venues: Vec<VenueId>,
        min_profit_percent: Decimal,
    ) -> Self {
        Self { commissions, cache, venues, min_profit_percent }
    }

    fn build_edges(&self) -> (Vec<Edge>, HashSet<String>) {
        let mut edges = Vec::new();
        let mut currencies = HashSet::new();

        for venue in &self.venues {
            for pair in self.commissions.symbols_for(venue) {
                currencies.insert(pair.base.clone());
                currencies.insert(pair.quote.clone());

                let Some(tob) = self.cache.get_orderbook(venue, &pair) else { continue };

                let f_buy = self.commissions.get_fee(venue, &pair, FeeSide::TakerBuy);
                let f_sell = self.commissions.get_fee(venue, &pair, FeeSide::TakerSell);

                // Buy edge: converting 1 QUOTE into (1 - fBuy)/ask BASE.
                let buy_rate = ((Decimal::ONE - f_buy) / tob.ask).to_f64().unwrap_or(0.0);
                if buy_rate > 0.0 {
                    edges.push(Edge {
                        venue: venue.clone(),
                        pair: pair.clone(),
                        side: CycleSide::Buy,
                        from: pair.quote.clone(),
                        to: pair.base.clone(),
                        weight: -buy_rate.ln(),
                        price: tob.ask,
                        volume: tob.ask_volume,
                    });
                }

                // Sell edge: converting 1 BASE into bid * (1 - fSell) QUOTE.
                let sell_rate = (tob.bid * (Decimal::ONE - f_sell)).to_f64().unwrap_or(0.0);
                if sell_rate > 0.0 {
                    edges.push(Edge {
                        venue: venue.clone(),
                        pair: pair.clone(),
                        side: CycleSide::Sell,
                        from: pair.base.clone(),
                        to: pair.quote.clone(),
                        weight: -sell_rate.ln(),
                        price: tob.bid,
                        volume: tob.bid_volume,
                    });
                }
            }
        }

        (edges, currencies)
    }

    /// Runs one scan, catching any panic the computation raises (e.g. a
    /// decimal overflow building the edge list) and reporting it as a
    /// [`FinderError::Cyclic`] instead of propagating it — per spec.md §7,
    /// a failed iteration returns an empty list rather than taking the
    /// publisher loop down with it.
    pub fn find(&self) -> Result<Vec<OpportunityCyclic>, FinderError> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.find_inner()))
            .map_err(|payload| FinderError::Cyclic(panic_message(payload)))
    }

    /// Bellman-Ford from every currency, collecting every negative cycle the
    /// final relaxation pass exposes, then canonicalizing and deduplicating
    /// rotations/reversals.
    fn find_inner(&self) -> Vec<OpportunityCyclic> {
        let (edges, currencies) = self.build_edges();
        if edges.is_empty() || currencies.len() < 3 {
            return Vec::new();
        }

        let mut raw_cycles: Vec<Vec<usize>> = Vec::new();

        for source in &currencies {
            let mut dist: HashMap<&str, f64> =
                currencies.iter().map(|c| (c.as_str(), f64::INFINITY)).collect();
            let mut pred_node: HashMap<String, String> = HashMap::new();
            let mut pred_edge: HashMap<String, usize> = HashMap::new();
            dist.insert(source.as_str(), 0.0);

            for _ in 0..currencies.len().saturating_sub(1) {
                let mut changed = false;
                for (idx, e) in edges.iter().enumerate() {
                    let Some(&du) = dist.get(e.from.as_str()) else { continue };
                    if du.is_infinite() {
                        continue;
                    }
                    let candidate = du + e.weight;
                    let dv = dist.get(e.to.as_str()).copied().unwrap_or(f64::INFINITY);
                    if candidate < dv {
                        dist.insert(e.to.as_str(), candidate);
                        pred_node.insert(e.to.clone(), e.from.clone());
                        pred_edge.insert(e.to.clone(), idx);
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            for e in &edges {
                let Some(&du) = dist.get(e.from.as_str()) else { continue };
                if du.is_infinite() {
                    continue;
                }
                let dv = dist.get(e.to.as_str()).copied().unwrap_or(f64::INFINITY);
                if du + e.weight < dv - 1e-12 {
                    if let Some(cycle) = trace_cycle(&e.to, &pred_node, &pred_edge, currencies.len()) {
                        raw_cycles.push(cycle);
                    }
                }
            }
        }

        let mut opportunities = Vec::new();
        let mut canonical_seen = HashSet::new();

        for cycle_edges in raw_cycles {
            if cycle_edges.len() < 3 || cycle_edges.len() > 8 {
                continue;
            }

            let canon = canonical_key(&cycle_edges, &edges);
            if !canonical_seen.insert(canon) {
                continue;
            }

            let sum_weights: f64 = cycle_edges.iter().map(|&i| edges[i].weight).sum();
            let profit_percent_f64 = (((-sum_weights).exp()) - 1.0) * 100.0;
            let profit_percent: Decimal = format!("{:.8}", profit_percent_f64)
                .parse()
                .unwrap_or(Decimal::ZERO);

            if profit_percent < self.min_profit_percent {
                continue;
            }

            let min_volume = cycle_edges.iter().map(|&i| edges[i].volume).min();
            let volume_usd = match min_volume {
                Some(v) if v > Decimal::ZERO => {
                    let sum_price: Decimal = cycle_edges.iter().map(|&i| edges[i].price).sum();
                    let avg_price = sum_price / Decimal::from(cycle_edges.len() as u64);
                    Some(v * avg_price)
                }
                _ => None,
            };

            let legs: Vec<CycleLeg> = cycle_edges
                .iter()
                .map(|&i| CycleLeg {
                    venue: edges[i].venue.to_string(),
                    pair: edges[i].pair.to_string(),
                    side: edges[i].side,
                })
                .collect();

            opportunities.push(OpportunityCyclic { cycle: legs, profit_percent, volume_usd });
        }

        opportunities.sort_by(|a, b| b.profit_percent.cmp(&a.profit_percent));
        opportunities
    }
}

/// Walks predecessors from `target` until a repeated vertex closes a loop,
/// then reverses the backward-discovered edge chain into execution order.
/// Returns `None` if the chain runs out (source reached) before repeating —
/// this trigger wasn't actually on a cycle.
fn trace_cycle(
    target: &str,
    pred_node: &HashMap<String, String>,
    pred_edge: &HashMap<String, usize>,
    max_len: usize,
) -> Option<Vec<usize>> {
    let mut chain: Vec<String> = vec![target.to_string()];

    loop {
        let last = chain.last().unwrap().clone();
        let prev = pred_node.get(&last)?.clone();

        if let Some(start_idx) = chain.iter().position(|n| *n == prev) {
            let edges_backward: Vec<usize> =
                chain[start_idx..].iter().map(|n| *pred_edge.get(n).unwrap()).collect();
            let mut edges_forward = edges_backward;
            edges_forward.reverse();
            return Some(edges_forward);
        }

        chain.push(prev);
        if chain.len() > max_len + 1 {
            return None;
        }
    }
}

/// Canonical dedup key: the lexicographically smallest rotation of the
/// cycle's `(venue, pair, side)` triples, so rotations and the same cycle
/// discovered from different sources collapse to one opportunity.
fn canonical_key(cycle_edges: &[usize], edges: &[Edge]) -> String {
    let triples: Vec<String> = cycle_edges
        .iter()
        .map(|&i| format!("{}|{}|{:?}", edges[i].venue, edges[i].pair, edges[i].side))
        .collect();

    (0..triples.len())
        .map(|start| {
            let mut rotated = triples[start..].to_vec();
            rotated.extend_from_slice(&triples[..start]);
            rotated.join(">>")
        })
        .min()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TopOfBook;
    use std::sync::Arc;
    use std::time::Duration;

    fn tob(venue: &VenueId, sym: &Symbol, bid: &str, ask: &str) -> TopOfBook {
        TopOfBook::from_raw(
            venue.clone(),
            sym.clone(),
            Some(bid.parse().unwrap()),
            Some(ask.parse().unwrap()),
            None,
            None,
            0,
        )
        .unwrap()
    }

    /// A 3-leg USDT -> BTC -> ETH -> USDT cycle should be profitable.
    #[test]
    fn cyclic_found_across_three_venues() {
        let mut table = CommissionTable::empty();
        let binance = VenueId::new("binance");
        let bybit = VenueId::new("bybit");
        let mexc = VenueId::new("mexc");
        let btc_usdt = Symbol::new("BTC", "USDT");
        let eth_btc = Symbol::new("ETH", "BTC");
        let eth_usdt = Symbol::new("ETH", "USDT");

        table.insert_for_test(&binance, &btc_usdt, FeeSide::TakerBuy, "0%");
        table.insert_for_test(&bybit, &eth_btc, FeeSide::TakerBuy, "0%");
        table.insert_for_test(&mexc, &eth_usdt, FeeSide::TakerBuy, "0%");

        let cache = FreshnessCache::new(Duration::from_secs(60));
        cache.put_orderbook(binance.clone(), btc_usdt.clone(), tob(&binance, &btc_usdt, "49000", "50000"));
        cache.put_orderbook(bybit.clone(), eth_btc.clone(), tob(&bybit, &eth_btc, "0.04", "0.05"));
        cache.put_orderbook(mexc.clone(), eth_usdt.clone(), tob(&mexc, &eth_usdt, "2600", "2500"));

        let finder = CyclicFinder::new(
            Arc::new(table),
            Arc::new(cache),
            vec![binance, bybit, mexc],
            Decimal::new(1, 2),
        );
        let found = finder.find().unwrap();

        assert!(!found.is_empty());
        let opp = &found[0];
        assert_eq!(opp.cycle.len(), 3);
        assert!(opp.profit_percent > Decimal::ZERO);
        let currencies: std::collections::HashSet<&str> =
            opp.cycle.iter().flat_map(|l| l.pair.split('/')).collect();
        assert!(currencies.contains("USDT"));
        assert!(currencies.contains("BTC"));
        assert!(currencies.contains("ETH"));
    }

    #[test]
    fn no_cycle_without_enough_currencies() {
        let mut table = CommissionTable::empty();
        let binance = VenueId::new("binance");
        let sym = Symbol::new("BTC", "USDT");
        table.insert_for_test(&binance, &sym, FeeSide::TakerBuy, "0%");
        let cache = FreshnessCache::new(Duration::from_secs(60));
        cache.put_orderbook(binance.clone(), sym.clone(), tob(&binance, &sym, "49000", "50000"));

        let finder = CyclicFinder::new(Arc::new(table), Arc::new(cache), vec![binance], Decimal::new(1, 2));
        assert!(finder.find().unwrap().is_empty());
    }

    #[test]
    fn no_cycle_when_rates_dont_compound_above_unity() {
        let mut table = CommissionTable::empty();
        let binance = VenueId::new("binance");
        let bybit = VenueId::new("bybit");
        let mexc = VenueId::new("mexc");
        let btc_usdt = Symbol::new("BTC", "USDT");
        let eth_btc = Symbol::new("ETH", "BTC");
        let eth_usdt = Symbol::new("ETH", "USDT");

        // Flat, fee-free, internally-consistent prices: no cycle should beat unity.
        for (venue, sym) in
            [(&binance, &btc_usdt), (&bybit, &eth_btc), (&mexc, &eth_usdt)]
        {
            table.insert_for_test(venue, sym, FeeSide::TakerBuy, "0%");
        }

        let cache = FreshnessCache::new(Duration::from_secs(60));
        cache.put_orderbook(binance.clone(), btc_usdt.clone(), tob(&binance, &btc_usdt, "50000", "50000"));
        cache.put_orderbook(bybit.clone(), eth_btc.clone(), tob(&bybit, &eth_btc, "0.05", "0.05"));
        cache.put_orderbook(mexc.clone(), eth_usdt.clone(), tob(&mexc, &eth_usdt, "2500", "2500"));

        let finder = CyclicFinder::new(
            Arc::new(table),
            Arc::new(cache),
            vec![binance, bybit, mexc],
            Decimal::new(1, 2),
        );
        assert!(finder.find().unwrap().is_empty());
    }
}
