//! Real-time cryptocurrency arbitrage scanner — core engine.
//!
//! Three collaborators are initialised once at startup and shared by
//! explicit injection (never ambient access), so tests can substitute
//! fakes for any of them: the [`commission::CommissionTable`], the
//! [`cache::FreshnessCache`], and the [`supervisor::IngestionSupervisor`].
//! The [`publisher::Publisher`] ties the finders to both together and is
//! the only thing the HTTP/WebSocket adapter in [`api`] ever calls.

pub mod adapter;
pub mod api;
pub mod cache;
pub mod commission;
pub mod config;
pub mod error;
pub mod finder;
pub mod publisher;
pub mod supervisor;
pub mod types;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::publisher::Publisher;

/// Shared application state handed to every Axum route. `Clone` is cheap —
/// everything inside is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<Publisher>,
    pub metrics_handle: PrometheusHandle,
}
