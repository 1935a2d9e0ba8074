//! Arbitrage Finders: the two periodic scans that read the
//! Freshness Cache and Commission Table and emit ranked, fee-adjusted
//! opportunities.
//!
//! Both finders are stateless: every invocation is a fresh read of whatever
//! the cache currently holds, re-deriving the universe of pairs from the
//! commission config on every call rather than caching it.

pub mod cyclic;
pub mod spatial;

pub use cyclic::CyclicFinder;
pub use spatial::SpatialFinder;

use std::collections::BTreeSet;

use crate::commission::CommissionTable;
use crate::types::{Symbol, VenueId};

/// Distinct venues that configure `symbol`, restricted to `venues`.
fn venues_for_symbol(commissions: &CommissionTable, venues: &[VenueId], symbol: &Symbol) -> Vec<VenueId> {
    venues
        .iter()
        .filter(|v| commissions.symbols_for(v).contains(symbol))
        .cloned()
        .collect()
}

fn distinct_symbols(commissions: &CommissionTable, venues: &[VenueId]) -> BTreeSet<Symbol> {
    let mut symbols = BTreeSet::new();
    for venue in venues {
        symbols.extend(commissions.symbols_for(venue));
    }
    symbols
}

/// Renders a `catch_unwind` payload into a loggable string. Covers the two
/// shapes `panic!`/`.unwrap()` actually produce (`&str`, `String`); anything
/// else (a custom panic payload type) falls back to a fixed message rather
/// than failing to extract one.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "finder panicked with a non-string payload".to_string()
    }
}
