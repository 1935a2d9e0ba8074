//! Commission Table: an in-memory lookup of per-venue taker fees.
//!
//! Built once at startup from a directory of `<venue>.json` files and
//! treated as immutable for the process lifetime, mirroring the original
//! loader's glob-and-parse startup pass but dropping its module-level
//! singleton in favor of explicit construction and injection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::{info, warn};

use crate::types::{parse_fee_checked, FeeRate, FeeSide, Symbol, VenueId};

/// Raw shape of one `<venue>.json` commission file: canonical symbol string
/// to fee-kind string to human-readable rate string.
#[derive(Debug, Deserialize)]
struct VenueCommissionFile(HashMap<String, HashMap<String, String>>);

/// `CommissionTable::getFee` logs a malformed-rate warning once per
/// (venue, symbol, side) rather than on every lookup.
#[derive(Default)]
struct WarnOnce(AtomicBool);

impl WarnOnce {
    fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}

pub struct CommissionTable {
    /// venue -> symbol -> fee kind -> raw rate string
    rates: HashMap<VenueId, HashMap<Symbol, HashMap<String, String>>>,
    malformed_warned: parking_lot::Mutex<std::collections::HashSet<(String, String, String)>>,
}

impl CommissionTable {
    /// Loads every `<venue>.json` file in `dir`. A missing directory is a
    /// warning, not fatal — the table is simply empty and every fee
    /// resolves to zero, matching the original loader's behavior.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut rates: HashMap<VenueId, HashMap<Symbol, HashMap<String, String>>> = HashMap::new();

        info!(dir = %dir.display(), "loading commission tables");

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(dir = %dir.display(), "commissions directory not found; all fees default to 0");
                return Self {
                    rates,
                    malformed_warned: parking_lot::Mutex::new(Default::default()),
                };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let venue = VenueId::new(stem);

            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(venue = %venue, error = %e, "failed to read commission file");
                    continue;
                }
            };
            let parsed: VenueCommissionFile = match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(venue = %venue, error = %e, "invalid JSON in commission file");
                    continue;
                }
            };

            let mut by_symbol: HashMap<Symbol, HashMap<String, String>> = HashMap::new();
            for (symbol_str, fee_kinds) in parsed.0 {
                let Ok(symbol) = symbol_str.parse::<Symbol>() else {
                    warn!(venue = %venue, symbol = %symbol_str, "skipping malformed symbol key");
                    continue;
                };
                by_symbol.insert(symbol, fee_kinds);
            }

            info!(venue = %venue, symbols = by_symbol.len(), "loaded commission table");
            rates.insert(venue, by_symbol);
        }

        if rates.is_empty() {
            warn!("no commission tables loaded; all fees default to 0");
        }

        Self {
            rates,
            malformed_warned: parking_lot::Mutex::new(Default::default()),
        }
    }

    /// An empty table: every lookup returns zero. Useful for tests and for
    /// a venue that has not shipped a commission file yet.
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
            malformed_warned: parking_lot::Mutex::new(Default::default()),
        }
    }

    /// Inserts a single rate programmatically — used by tests that don't
    /// want to touch the filesystem.
    pub fn insert_for_test(&mut self, venue: &VenueId, symbol: &Symbol, side: FeeSide, raw: &str) {
        self.rates
            .entry(venue.clone())
            .or_default()
            .entry(symbol.clone())
            .or_default()
            .insert(side.key().to_string(), raw.to_string());
    }

    /// Returns the configured taker fee rate for `(venue, symbol, side)`, or
    /// zero if absent. `TakerSell` falls back to `TakerOrder` when the venue
    /// file has no explicit sell rate, per the preserved original behavior.
    pub fn get_fee(&self, venue: &VenueId, symbol: &Symbol, side: FeeSide) -> FeeRate {
        let Some(by_symbol) = self.rates.get(venue) else {
            return rust_decimal::Decimal::ZERO;
        };
        let Some(kinds) = by_symbol.get(symbol) else {
            return rust_decimal::Decimal::ZERO;
        };

        let raw = kinds.get(side.key()).or_else(|| {
            if side == FeeSide::TakerSell {
                kinds.get(FeeSide::TakerOrder.key())
            } else {
                None
            }
        });

        let Some(raw) = raw else { return rust_decimal::Decimal::ZERO };

        match parse_fee_checked(raw) {
            Ok(rate) => rate,
            Err(()) => {
                let key = (venue.as_str().to_string(), symbol.to_string(), side.key().to_string());
                if self.malformed_warned.lock().insert(key) {
                    warn!(venue = %venue, symbol = %symbol, side = side.key(), raw, "malformed fee rate, defaulting to 0");
                }
                rust_decimal::Decimal::ZERO
            }
        }
    }

    /// The symbols configured for `venue`; order is irrelevant.
    pub fn symbols_for(&self, venue: &VenueId) -> Vec<Symbol> {
        self.rates
            .get(venue)
            .map(|by_symbol| by_symbol.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(s: &str) -> VenueId {
        VenueId::new(s)
    }

    #[test]
    fn taker_sell_falls_back_to_taker_order() {
        let mut table = CommissionTable::empty();
        let v = venue("binance");
        let s = Symbol::new("BTC", "USDT");
        table.insert_for_test(&v, &s, FeeSide::TakerOrder, "0.20%");
        let fee = table.get_fee(&v, &s, FeeSide::TakerSell);
        assert_eq!(fee, rust_decimal::Decimal::new(2, 3));
    }

    #[test]
    fn missing_venue_defaults_to_zero() {
        let table = CommissionTable::empty();
        let v = venue("binance");
        let s = Symbol::new("BTC", "USDT");
        assert_eq!(table.get_fee(&v, &s, FeeSide::TakerBuy), rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn explicit_taker_sell_wins_over_taker_order() {
        let mut table = CommissionTable::empty();
        let v = venue("binance");
        let s = Symbol::new("BTC", "USDT");
        table.insert_for_test(&v, &s, FeeSide::TakerOrder, "0.50%");
        table.insert_for_test(&v, &s, FeeSide::TakerSell, "0.10%");
        let fee = table.get_fee(&v, &s, FeeSide::TakerSell);
        assert_eq!(fee, rust_decimal::Decimal::new(1, 3));
    }

    #[test]
    fn loads_one_json_file_per_venue_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("binance.json"),
            r#"{"BTC/USDT": {"taker_buy_rate": "0.10%", "taker_sell_rate": "0.10%"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("not-json.txt"), "ignored").unwrap();

        let table = CommissionTable::load_from_dir(dir.path());
        let v = venue("binance");
        let s = Symbol::new("BTC", "USDT");
        assert_eq!(table.get_fee(&v, &s, FeeSide::TakerBuy), rust_decimal::Decimal::new(1, 3));
        assert_eq!(table.symbols_for(&v), vec![s]);
    }

    #[test]
    fn missing_directory_yields_an_empty_table_not_an_error() {
        let table = CommissionTable::load_from_dir("/no/such/path/ever");
        let v = venue("binance");
        let s = Symbol::new("BTC", "USDT");
        assert_eq!(table.get_fee(&v, &s, FeeSide::TakerBuy), rust_decimal::Decimal::ZERO);
    }
}
