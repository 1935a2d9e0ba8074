//! Core data model: symbols, venues, top-of-book snapshots, fees and
//! opportunity records.
//!
//! All monetary quantities are [`rust_decimal::Decimal`] — IEEE-754 floats
//! never appear here. The one exception to that rule lives in
//! `finder::cyclic`, where the negative-cycle search runs in `f64` for
//! `ln`/`exp` performance and converts back to `Decimal` at its boundary.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A lowercase venue identifier, e.g. `binance`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_uppercase(&self) -> String {
        self.0.to_uppercase()
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A canonical `BASE/QUOTE` trading pair, uppercase ASCII on both sides.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid symbol {0:?}: expected BASE/QUOTE")]
pub struct SymbolParseError(String);

impl FromStr for Symbol {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| SymbolParseError(s.to_string()))?;
        if base.is_empty() || quote.is_empty() {
            return Err(SymbolParseError(s.to_string()));
        }
        Ok(Symbol::new(base, quote))
    }
}

/// The side a commission rate applies to. `TakerSell` falls back to
/// `TakerOrder` when a venue's commission file has no explicit sell rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeSide {
    TakerBuy,
    TakerSell,
    TakerOrder,
}

impl FeeSide {
    pub fn key(&self) -> &'static str {
        match self {
            FeeSide::TakerBuy => "taker_buy_rate",
            FeeSide::TakerSell => "taker_sell_rate",
            FeeSide::TakerOrder => "taker_order_rate",
        }
    }
}

/// `(venue, symbol, side)` — the lookup key into the commission table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommissionKey {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: FeeSide,
}

/// A non-negative fee rate in `[0, 1)`.
pub type FeeRate = Decimal;

/// Parses a human-entered fee string such as `"0.10%"` into a decimal
/// fraction. A trailing `%` divides by 100; anything else — missing,
/// empty, or malformed — is treated as zero.
pub fn parse_fee(raw: Option<&str>) -> FeeRate {
    raw.and_then(|r| parse_fee_checked(r).ok()).unwrap_or(Decimal::ZERO)
}

/// Like [`parse_fee`] but distinguishes "legitimately absent/zero" from
/// "non-numeric garbage", so a caller can log a malformed rate once
/// without also warning on every ordinary empty field.
pub fn parse_fee_checked(raw: &str) -> Result<FeeRate, ()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if let Some(pct) = trimmed.strip_suffix('%') {
        return pct.trim().parse::<Decimal>().map(|d| d / Decimal::ONE_HUNDRED).map_err(|_| ());
    }
    trimmed.parse::<Decimal>().map_err(|_| ())
}

/// The freshness cache has two independent namespaces per `(venue, symbol)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookKind {
    Ticker,
    Orderbook,
}

/// Best bid/ask snapshot for a `(venue, symbol)` at a point in time.
///
/// Invariant: a `TopOfBook` with `bid <= 0` or `ask <= 0` is never
/// constructed by a well-behaved adapter — see
/// [`TopOfBook::from_raw`].
#[derive(Debug, Clone, PartialEq)]
pub struct TopOfBook {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// Milliseconds since epoch, as observed upstream (wall-clock reference only).
    pub timestamp_ms: i64,
}

impl TopOfBook {
    /// Builds a `TopOfBook` from raw, possibly-missing upstream fields.
    /// Returns `None` if either side is missing, zero, or negative — the
    /// event is dropped silently per the adapter's normalization rule.
    pub fn from_raw(
        venue: VenueId,
        symbol: Symbol,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        bid_volume: Option<Decimal>,
        ask_volume: Option<Decimal>,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let bid = bid?;
        let ask = ask?;
        if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
            return None;
        }
        Some(Self {
            venue,
            symbol,
            bid,
            ask,
            bid_volume: bid_volume.unwrap_or(Decimal::ZERO),
            ask_volume: ask_volume.unwrap_or(Decimal::ZERO),
            timestamp_ms,
        })
    }
}

/// Wire-format helpers: stringifies every `Decimal` in the JSON shape,
/// including `None` as JSON `null` rather than an absent field.
mod decimal_wire {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, s: S) -> Result<S::Ok, S::Error> {
        value.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }

    pub mod option {
        use rust_decimal::Decimal;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<Decimal>, s: S) -> Result<S::Ok, S::Error> {
            value.map(|d| d.to_string()).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|s| s.parse().map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// A two-venue arbitrage opportunity: buy `pair` on `buy_venue`, sell it on
/// `sell_venue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunitySpatial {
    pub pair: String,
    #[serde(rename = "buy_exchange")]
    pub buy_venue: String,
    #[serde(rename = "sell_exchange")]
    pub sell_venue: String,
    #[serde(with = "decimal_wire")]
    pub buy_price: Decimal,
    #[serde(with = "decimal_wire")]
    pub sell_price: Decimal,
    #[serde(with = "decimal_wire")]
    pub profit_percent: Decimal,
    #[serde(with = "decimal_wire::option", rename = "volume_usd")]
    pub volume_usd: Option<Decimal>,
}

/// One leg of a cyclic opportunity: trade `pair` on `venue` in direction `side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleSide {
    Buy,
    Sell,
}

/// One leg of a cyclic opportunity: trade `pair` on `venue` in direction
/// `side`. Wire format is a bare `[venue, pair, side]` JSON tuple per
/// spec.md §6, not an object — the `Serialize`/`Deserialize` impls below are
/// hand-written rather than derived for that reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleLeg {
    pub venue: String,
    pub pair: String,
    pub side: CycleSide,
}

impl Serialize for CycleLeg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(3)?;
        tup.serialize_element(&self.venue)?;
        tup.serialize_element(&self.pair)?;
        tup.serialize_element(&self.side)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for CycleLeg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (venue, pair, side) = <(String, String, CycleSide)>::deserialize(deserializer)?;
        Ok(CycleLeg { venue, pair, side })
    }
}

/// A closed currency cycle (3-8 legs) whose fee-adjusted rates compound to
/// more than unity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityCyclic {
    pub cycle: Vec<CycleLeg>,
    #[serde(with = "decimal_wire")]
    pub profit_percent: Decimal,
    #[serde(with = "decimal_wire::option", rename = "volume_usd")]
    pub volume_usd: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fee_percent_suffix() {
        assert_eq!(parse_fee(Some("0.10%")), Decimal::new(1, 3));
    }

    #[test]
    fn parse_fee_none_is_zero() {
        assert_eq!(parse_fee(None), Decimal::ZERO);
    }

    #[test]
    fn parse_fee_malformed_is_zero() {
        assert_eq!(parse_fee(Some("not-a-fee")), Decimal::ZERO);
    }

    #[test]
    fn symbol_roundtrips_through_display() {
        let s = Symbol::new("btc", "usdt");
        assert_eq!(s.to_string(), "BTC/USDT");
        assert_eq!("BTC/USDT".parse::<Symbol>().unwrap(), s);
    }

    #[test]
    fn top_of_book_rejects_non_positive_sides() {
        let venue = VenueId::new("binance");
        let sym = Symbol::new("BTC", "USDT");
        assert!(TopOfBook::from_raw(
            venue.clone(),
            sym.clone(),
            Some(Decimal::ZERO),
            Some(Decimal::new(100, 0)),
            None,
            None,
            0
        )
        .is_none());
        assert!(TopOfBook::from_raw(venue, sym, None, Some(Decimal::new(100, 0)), None, None, 0)
            .is_none());
    }

    /// Pins the wire shape spec.md §6 requires: uppercase exchange names,
    /// every decimal as a string, and a `null` (not an absent key) when
    /// volume is undisclosed.
    #[test]
    fn opportunity_spatial_matches_spec_wire_shape() {
        let opp = OpportunitySpatial {
            pair: "BTC/USDT".to_string(),
            buy_venue: "BYBIT".to_string(),
            sell_venue: "BINANCE".to_string(),
            buy_price: Decimal::new(48000, 0),
            sell_price: Decimal::new(49000, 0),
            profit_percent: Decimal::new(208, 2),
            volume_usd: None,
        };

        let value = serde_json::to_value(&opp).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "pair": "BTC/USDT",
                "buy_exchange": "BYBIT",
                "sell_exchange": "BINANCE",
                "buy_price": "48000",
                "sell_price": "49000",
                "profit_percent": "2.08",
                "volume_usd": null,
            })
        );
    }

    /// A cyclic opportunity's `cycle` field is a bare `[venue, pair, side]`
    /// tuple array, not an array of objects — the whole point of `CycleLeg`'s
    /// hand-written `Serialize`/`Deserialize`.
    #[test]
    fn opportunity_cyclic_matches_spec_wire_shape() {
        let opp = OpportunityCyclic {
            cycle: vec![
                CycleLeg { venue: "binance".to_string(), pair: "BTC/USDT".to_string(), side: CycleSide::Buy },
                CycleLeg { venue: "bybit".to_string(), pair: "ETH/BTC".to_string(), side: CycleSide::Sell },
            ],
            profit_percent: Decimal::new(150, 2),
            volume_usd: Some(Decimal::new(1000, 0)),
        };

        let value = serde_json::to_value(&opp).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "cycle": [
                    ["binance", "BTC/USDT", "buy"],
                    ["bybit", "ETH/BTC", "sell"],
                ],
                "profit_percent": "1.50",
                "volume_usd": "1000",
            })
        );

        let round_tripped: OpportunityCyclic = serde_json::from_value(value).unwrap();
        assert_eq!(round_tripped.cycle.len(), 2);
        assert_eq!(round_tripped.cycle[0].side, CycleSide::Buy);
    }
}
