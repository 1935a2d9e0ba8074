//! Publisher: the periodic driver that runs both finders, ranks their
//! output, and fans it out to subscribers — plus the on-demand
//! request/response variants the API layer calls directly.
//!
//! A fixed period, no overlapping ticks, one finder's failure never aborts
//! the loop. Subscribers receive each tick over a
//! [`tokio::sync::broadcast`] channel pair rather than a request/response
//! pub-sub hop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::FreshnessCache;
use crate::commission::CommissionTable;
use crate::finder::{CyclicFinder, SpatialFinder};
use crate::types::{OpportunityCyclic, OpportunitySpatial, VenueId};

const CHANNEL_CAPACITY: usize = 64;

/// Periodic driver for the two finders. Cheap to construct — finders are
/// rebuilt from the shared collaborators on every tick rather than held
/// across ticks, since both finders are stateless.
pub struct Publisher {
    commissions: Arc<CommissionTable>,
    cache: Arc<FreshnessCache>,
    venues: Vec<VenueId>,
    min_profit_percent: rust_decimal::Decimal,
    period: Duration,
    spatial_tx: broadcast::Sender<Vec<OpportunitySpatial>>,
    cyclic_tx: broadcast::Sender<Vec<OpportunityCyclic>>,
}

impl Publisher {
    pub fn new(
        commissions: Arc<CommissionTable>,
        cache: Arc<FreshnessCache>,
        venues: Vec<VenueId>,
        min_profit_percent: rust_decimal::Decimal,
        period: Duration,
    ) -> Self {
        let (spatial_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cyclic_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { commissions, cache, venues, min_profit_percent, period, spatial_tx, cyclic_tx }
    }

    pub fn subscribe_spatial(&self) -> broadcast::Receiver<Vec<OpportunitySpatial>> {
        self.spatial_tx.subscribe()
    }

    pub fn subscribe_cyclic(&self) -> broadcast::Receiver<Vec<OpportunityCyclic>> {
        self.cyclic_tx.subscribe()
    }

    fn spatial_finder(&self) -> SpatialFinder {
        SpatialFinder::new(
            self.commissions.clone(),
            self.cache.clone(),
            self.venues.clone(),
            self.min_profit_percent,
        )
    }

    fn cyclic_finder(&self) -> CyclicFinder {
        CyclicFinder::new(
            self.commissions.clone(),
            self.cache.clone(),
            self.venues.clone(),
            self.min_profit_percent,
        )
    }

    /// On-demand spatial scan for request/response API calls. Per spec.md
    /// §7, a [`FinderError`] never reaches the caller as a failure — it is
    /// logged and substituted with an empty list for that call.
    pub fn find_spatial_now(&self) -> Vec<OpportunitySpatial> {
        self.spatial_finder().find().unwrap_or_else(|e| {
            error!(error = %e, "spatial finder failed; returning no opportunities");
            Vec::new()
        })
    }

    /// On-demand cyclic scan for request/response API calls. Same
    /// error-to-empty-list policy as [`Publisher::find_spatial_now`].
    pub fn find_cyclic_now(&self) -> Vec<OpportunityCyclic> {
        self.cyclic_finder().find().unwrap_or_else(|e| {
            error!(error = %e, "cyclic finder failed; returning no opportunities");
            Vec::new()
        })
    }

    /// Runs every `period`, sequentially: spatial then cyclic, broadcasting
    /// both. Neither finder ever panics out of `find_spatial_now`/
    /// `find_cyclic_now` — each catches and converts its own computation
    /// failures into a [`FinderError`] — so a single iteration's failure is
    /// a logged, substituted empty list rather than a dead loop. The next
    /// iteration still starts a full `period` after the last one began —
    /// iterations never overlap and a slow tick is not compensated for by a
    /// shorter sleep below zero.
    pub async fn run_loop(&self, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "publisher loop starting");
        loop {
            let tick_start = Instant::now();

            self.run_iteration();

            let elapsed = tick_start.elapsed();
            let remainder = self.period.checked_sub(elapsed).unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("publisher loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(remainder) => {}
            }
        }
    }

    fn run_iteration(&self) {
        let spatial_start = Instant::now();
        let spatial = self.find_spatial_now();
        record_finder_metrics("spatial", spatial_start.elapsed(), spatial.len());
        let _ = self.spatial_tx.send(spatial);

        let cyclic_start = Instant::now();
        let cyclic = self.find_cyclic_now();
        record_finder_metrics("cyclic", cyclic_start.elapsed(), cyclic.len());
        let _ = self.cyclic_tx.send(cyclic);
    }
}

fn record_finder_metrics(kind: &'static str, duration: Duration, count: usize) {
    metrics::histogram!("arbitrage_search_seconds", "kind" => kind).record(duration.as_secs_f64());
    metrics::counter!("arbitrage_opportunities_found", "kind" => kind).increment(count as u64);
}
