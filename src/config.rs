//! Environment-sourced configuration.
//!
//! Follows the project's usual `Config::from_env()` shape: soft-defaulted
//! values use `env::var(..).ok().and_then(..).unwrap_or(default)`, the
//! handful of values that must parse correctly return a
//! [`crate::error::ConfigError`] instead of silently falling back.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// Minimum profit percent below which an opportunity is not reported.
pub const DEFAULT_MIN_PROFIT_PERCENT: &str = "0.01";

/// Default venue list, matching the set the system has always scanned.
const DEFAULT_EXCHANGES: &str = "binance,bybit,mexc,bitget,kucoin";

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub min_profit_percent: Decimal,
    pub exchanges: Vec<String>,
    pub cache_ttl: Duration,
    pub publisher_period: Duration,
    pub commissions_dir: String,
    pub http_bind_addr: String,
}

impl ScannerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let min_profit_raw =
            env::var("MIN_PROFIT_PERCENT").unwrap_or_else(|_| DEFAULT_MIN_PROFIT_PERCENT.to_string());
        let min_profit_percent: Decimal = min_profit_raw.parse().map_err(|_| ConfigError::Invalid {
            field: "MIN_PROFIT_PERCENT",
            value: min_profit_raw.clone(),
            reason: "not a valid decimal".to_string(),
        })?;

        let exchanges: Vec<String> = env::var("EXCHANGES")
            .unwrap_or_else(|_| DEFAULT_EXCHANGES.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if exchanges.is_empty() {
            return Err(ConfigError::Empty { field: "EXCHANGES" });
        }

        let cache_ttl_secs = env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let publisher_period_secs = env::var("PUBLISHER_PERIOD_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);

        let commissions_dir =
            env::var("COMMISSIONS_DIR").unwrap_or_else(|_| "./commissions".to_string());

        let http_bind_addr =
            env::var("HTTP_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Ok(Self {
            min_profit_percent,
            exchanges,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            publisher_period: Duration::from_secs(publisher_period_secs),
            commissions_dir,
            http_bind_addr,
        })
    }
}
