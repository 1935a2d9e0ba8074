//! Ingestion Supervisor: lifecycle owner of every venue adapter.
//!
//! `start()`/`stop()` follow a construct-once, cancel-via-token,
//! await-with-a-grace-timeout shape, applied to a dynamic per-venue adapter
//! set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{binance::BinanceAdapter, bybit::BybitAdapter, ExchangeAdapter, SHUTDOWN_GRACE};
use crate::cache::FreshnessCache;
use crate::commission::CommissionTable;
use crate::error::AdapterError;
use crate::types::VenueId;

/// Builds the concrete adapter for a venue from its configured symbol set.
/// Unknown venue names are skipped with a warning rather than treated as
/// fatal — the supervisor only refuses to start on a hard cache failure.
fn build_adapter(venue: &str, symbols: Vec<crate::types::Symbol>) -> Option<Arc<dyn ExchangeAdapter>> {
    match venue {
        "binance" => Some(BinanceAdapter::new(symbols) as Arc<dyn ExchangeAdapter>),
        "bybit" => Some(BybitAdapter::new(symbols) as Arc<dyn ExchangeAdapter>),
        other => {
            let err = AdapterError::PermanentVenue {
                venue: other.to_string(),
                symbol: String::new(),
                reason: "no adapter implementation for this venue".to_string(),
            };
            warn!(error = %err, "skipping venue");
            None
        }
    }
}

struct Running {
    cancel: CancellationToken,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
}

/// Owns the lifecycle of every per-venue [`ExchangeAdapter`]. Does not start
/// finders — the Publisher owns those independently.
pub struct IngestionSupervisor {
    cache: Arc<FreshnessCache>,
    commissions: Arc<CommissionTable>,
    enabled_venues: Vec<String>,
    running: Mutex<Option<Running>>,
}

impl IngestionSupervisor {
    pub fn new(
        cache: Arc<FreshnessCache>,
        commissions: Arc<CommissionTable>,
        enabled_venues: Vec<String>,
    ) -> Self {
        Self { cache, commissions, enabled_venues, running: Mutex::new(None) }
    }

    /// Idempotent: a second call stops whatever is running first.
    pub async fn start(&self) {
        self.stop().await;

        let cancel = CancellationToken::new();
        let mut adapters = Vec::new();

        for venue_name in &self.enabled_venues {
            let venue = VenueId::new(venue_name.as_str());
            let symbols = self.commissions.symbols_for(&venue);
            if symbols.is_empty() {
                warn!(venue = %venue, "no usable symbols configured; skipping venue");
                continue;
            }

            let Some(adapter) = build_adapter(venue.as_str(), symbols) else { continue };
            adapter.clone().spawn(self.cache.clone(), cancel.clone()).await;
            adapters.push(adapter);
        }

        info!(venues = adapters.len(), "ingestion supervisor started");
        *self.running.lock().await = Some(Running { cancel, adapters });
    }

    /// Cancels every adapter task and awaits completion with a 15s grace
    /// period. A venue that ignores cancellation is logged and abandoned
    /// rather than deadlocking the supervisor.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else { return };
        running.cancel.cancel();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while running.adapters.iter().any(|a| a.is_connected()) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("ingestion supervisor: one or more adapters did not stop within the shutdown grace period; abandoning");
        }
        info!("ingestion supervisor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_a_noop_when_not_running() {
        let cache = Arc::new(FreshnessCache::new(StdDuration::from_secs(60)));
        let commissions = Arc::new(CommissionTable::empty());
        let sup = IngestionSupervisor::new(cache, commissions, vec!["binance".to_string()]);
        // No commission entries means no usable symbols; start() should not panic.
        sup.start().await;
        assert!(sup.is_running().await);
        sup.stop().await;
        assert!(!sup.is_running().await);
        sup.stop().await;
    }

    #[tokio::test]
    async fn unknown_venue_is_skipped() {
        let cache = Arc::new(FreshnessCache::new(StdDuration::from_secs(60)));
        let mut commissions = CommissionTable::empty();
        let venue = VenueId::new("nosuchvenue");
        let sym = crate::types::Symbol::new("BTC", "USDT");
        commissions.insert_for_test(&venue, &sym, crate::types::FeeSide::TakerBuy, "0%");
        let sup = IngestionSupervisor::new(cache, Arc::new(commissions), vec!["nosuchvenue".to_string()]);
        sup.start().await;
        assert!(sup.is_running().await);
        sup.stop().await;
    }
}
