//! Pricing configuration.
//!
//! A small immutable record of rate constants with compiled-in defaults.
//! Deployments may override the defaults through a [`PricingSource`]
//! (typically a single settings row owned by the admin surface); when the
//! source has nothing to offer, every consumer falls back to the defaults so
//! a quotation can always be produced.

use serde::{Deserialize, Serialize};

/// Default shipping rate in dollars per cubic inch.
pub const DEFAULT_RATE_PER_IN3: f64 = 0.0145;

/// Default flat stop fee for an in-zone pickup.
pub const DEFAULT_IN_ZONE_STOP_FEE: f64 = 25.0;

/// Default base fee for an out-of-zone pickup.
pub const DEFAULT_OUT_OF_ZONE_BASE_FEE: f64 = 25.0;

/// Default per-item fee added on top of the out-of-zone base fee.
pub const DEFAULT_OUT_OF_ZONE_PER_ITEM_FEE: f64 = 15.0;

/// Rate constants consumed by the quotation engine.
///
/// Immutable per request: the intake pipeline resolves one `PricingConfig`
/// before quoting and uses it for the whole submission, so a concurrent
/// settings change can never split a single quote across two rate sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Shipping rate in dollars per cubic inch of pledged volume.
    pub rate_per_in3: f64,
    /// Flat fee for an in-zone pickup stop, independent of quantity.
    pub in_zone_stop_fee: f64,
    /// Base fee for an out-of-zone pickup.
    pub out_of_zone_base_fee: f64,
    /// Per-item fee multiplied by quantity for an out-of-zone pickup.
    pub out_of_zone_per_item_fee: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rate_per_in3: DEFAULT_RATE_PER_IN3,
            in_zone_stop_fee: DEFAULT_IN_ZONE_STOP_FEE,
            out_of_zone_base_fee: DEFAULT_OUT_OF_ZONE_BASE_FEE,
            out_of_zone_per_item_fee: DEFAULT_OUT_OF_ZONE_PER_ITEM_FEE,
        }
    }
}

/// Source of externally configured pricing.
///
/// Implementations load from wherever the deployment keeps its settings
/// (the daemon reads a SQLite settings row). A source that cannot produce a
/// value returns `None` and is expected to log the cause itself; callers
/// never fail a submission because pricing configuration is absent.
pub trait PricingSource: Send + Sync {
    /// Returns the configured pricing, or `None` when the source has no
    /// value (missing row, unreadable store).
    fn load(&self) -> Option<PricingConfig>;

    /// Resolved pricing for a request: configured values when available,
    /// compiled defaults otherwise.
    fn current(&self) -> PricingConfig {
        self.load().unwrap_or_default()
    }
}

/// A fixed pricing source, useful for tests and pinned deployments.
impl PricingSource for PricingConfig {
    fn load(&self) -> Option<PricingConfig> {
        Some(*self)
    }
}
