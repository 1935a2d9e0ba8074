//! Error taxonomy for the arbitrage core.
//!
//! Adapter- and finder-level errors are structured (`thiserror`) because the
//! supervisor and publisher branch on their kind; the binary boundary
//! (`main.rs`, startup) stays on `anyhow::Result` the way the rest of the
//! codebase does.
//!
//! `CacheUnavailable` has no variant here: the Freshness Cache is an
//! in-process `DashMap`, not a networked dependency, so there is no failure
//! mode for a read/write to surface — a miss and an outage are
//! indistinguishable and both already resolve to "absent" at the call site.

use thiserror::Error;

/// Errors an [`crate::adapter::ExchangeAdapter`] can surface to its supervised task.
///
/// None of these ever unwind through the supervisor: the adapter task catches
/// them itself and decides whether to log-and-reconnect or log-and-give-up.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient stream error on {venue}/{symbol}: {source}")]
    TransientStream {
        venue: String,
        symbol: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("permanent venue error on {venue}/{symbol}: {reason}")]
    PermanentVenue { venue: String, symbol: String, reason: String },

    #[error("invalid message from {venue}: {reason}")]
    InvalidMessage { venue: String, reason: String },
}

/// Errors a finder invocation can raise. Per policy, the publisher always
/// catches these and substitutes an empty result set for that iteration.
#[derive(Debug, Error)]
pub enum FinderError {
    #[error("spatial finder failed: {0}")]
    Spatial(String),

    #[error("cyclic finder failed: {0}")]
    Cyclic(String),
}

/// Fatal, startup-only configuration errors. The process aborts on these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} has an invalid value {value:?}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}
