//! Volumetric quotation engine.
//!
//! Turns a cargo description plus a pickup choice into a cost estimate. The
//! engine is a pure function of its inputs: identical inputs always yield an
//! identical [`Quote`], which is what lets the pipeline persist a quote's
//! components and later reproduce them exactly from the stored raw fields.
//!
//! # Rounding
//!
//! The one rounding point is the cent: the shipping cost, the pickup fee,
//! and the optional heavy-item surcharge are each rounded half-up at two
//! decimal places, and the total is the plain sum of the already-rounded
//! parts. Nothing else is rounded, so `total == shipping + pickup +
//! surcharge` holds exactly.
//!
//! # Cargo modes
//!
//! A submitter describes cargo one of three ways, modelled as a sum type so
//! a new mode cannot be added without every consumer handling it:
//!
//! - a standard box code resolved through a fixed dimension table,
//! - explicit custom dimensions in inches,
//! - a rough size category resolved through a fixed cubic-feet table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::PricingConfig;

/// Cubic inches per cubic foot. Part of the engine contract, not
/// configuration: persisted volumes would silently disagree across
/// deployments if this were tunable.
pub const IN3_PER_FT3: f64 = 1728.0;

/// Weight above which a cargo item counts as heavy, in pounds.
pub const DEFAULT_HEAVY_THRESHOLD_LB: f64 = 150.0;

/// Default flat heavy-handling fee.
pub const DEFAULT_HEAVY_FLAT_FEE: f64 = 50.0;

/// Default per-pound rate applied to weight above the threshold.
pub const DEFAULT_HEAVY_PER_LB_FEE: f64 = 0.75;

/// Rounds a dollar amount half-up at the cent.
///
/// `f64::round` rounds half away from zero, which is half-up for the
/// non-negative amounts the engine produces.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Standard box codes with fixed dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoxCode {
    /// Small cube, 18×18×18 in.
    S,
    /// Medium cube, 24×24×24 in.
    M,
    /// Large box, 24×24×48 in.
    L,
    /// Flat television box, 18×18×48 in.
    Tv,
}

impl BoxCode {
    /// Every known box code, in display order.
    pub const ALL: [Self; 4] = [Self::S, Self::M, Self::L, Self::Tv];

    /// Fixed dimensions for this code as `(length, width, height)` inches.
    #[must_use]
    pub const fn dimensions_in(self) -> (f64, f64, f64) {
        match self {
            Self::S => (18.0, 18.0, 18.0),
            Self::M => (24.0, 24.0, 24.0),
            Self::L => (24.0, 24.0, 48.0),
            Self::Tv => (18.0, 18.0, 48.0),
        }
    }

    /// Wire tag for this code.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::Tv => "TV",
        }
    }

    /// Resolves a wire tag, case-insensitively. Unknown tags resolve to
    /// `None`; the caller decides how to report that.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_tag().eq_ignore_ascii_case(tag))
    }
}

/// Rough size categories with fixed cubic-feet volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateCategory {
    /// About two cubic feet, a couple of suitcases.
    Small,
    /// About four cubic feet.
    Medium,
    /// About eight cubic feet, appliance-sized.
    Large,
}

impl EstimateCategory {
    /// Every known category.
    pub const ALL: [Self; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Fixed volume for this category in cubic feet.
    #[must_use]
    pub const fn cubic_feet(self) -> f64 {
        match self {
            Self::Small => 2.0,
            Self::Medium => 4.0,
            Self::Large => 8.0,
        }
    }

    /// Wire tag for this category.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Resolves a wire tag, case-insensitively.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cat| cat.as_tag().eq_ignore_ascii_case(tag))
    }
}

/// One of the three mutually exclusive cargo descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cargo_mode", rename_all = "snake_case")]
pub enum CargoSpec {
    /// A standard box resolved through the dimension table.
    StandardBox {
        /// Which standard box.
        code: BoxCode,
    },
    /// Caller-supplied dimensions in inches; each must be positive.
    CustomDims {
        /// Length in inches.
        length_in: f64,
        /// Width in inches.
        width_in: f64,
        /// Height in inches.
        height_in: f64,
    },
    /// A rough size category resolved through the volume table.
    Estimate {
        /// Which category.
        category: EstimateCategory,
    },
}

impl CargoSpec {
    /// Volume of a single item in cubic inches.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::InvalidCargoSpec`] when a custom dimension is
    /// not a positive finite number.
    pub fn unit_volume_in3(&self) -> Result<f64, QuoteError> {
        match *self {
            Self::StandardBox { code } => {
                let (l, w, h) = code.dimensions_in();
                Ok(l * w * h)
            },
            Self::CustomDims {
                length_in,
                width_in,
                height_in,
            } => {
                for dim in [length_in, width_in, height_in] {
                    if !dim.is_finite() || dim <= 0.0 {
                        return Err(QuoteError::InvalidCargoSpec {
                            reason: format!(
                                "custom dimensions must be positive, got \
                                 {length_in}x{width_in}x{height_in}"
                            ),
                        });
                    }
                }
                Ok(length_in * width_in * height_in)
            },
            Self::Estimate { category } => Ok(category.cubic_feet() * IN3_PER_FT3),
        }
    }
}

/// A cargo description: one spec plus how many of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CargoDescription {
    /// How the cargo's size is described.
    #[serde(flatten)]
    pub spec: CargoSpec,
    /// Item count multiplying the per-unit volume. Must be at least 1.
    pub quantity: u32,
}

/// Pickup choice: a flat in-zone stop or an out-of-zone run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pickup_zone", rename_all = "snake_case")]
pub enum Pickup {
    /// Flat stop fee regardless of quantity.
    InZone,
    /// Base fee plus a per-item fee; carries an optional city label for
    /// the pickup run.
    OutOfZone {
        /// Free-text city label supplied by the submitter.
        city: Option<String>,
    },
}

impl Pickup {
    /// Wire tag for the zone.
    #[must_use]
    pub const fn zone_tag(&self) -> &'static str {
        match self {
            Self::InZone => "in_zone",
            Self::OutOfZone { .. } => "out_of_zone",
        }
    }
}

/// The deterministic output of the engine.
///
/// Persisted alongside the raw cargo fields when a pledge is recorded, and
/// reproducible from them: replaying [`quote`] over the stored inputs must
/// yield these exact values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Total pledged volume in cubic inches.
    pub volume_in3: f64,
    /// Total pledged volume in cubic feet (`volume_in3 / 1728`).
    pub volume_ft3: f64,
    /// Volume times the configured rate, rounded at the cent.
    pub shipping_cost: f64,
    /// Pickup fee for the chosen zone, rounded at the cent.
    pub pickup_fee: f64,
    /// Heavy-item surcharge; zero unless a surcharge rule applied.
    pub surcharge: f64,
    /// Sum of the rounded parts. Never independently rounded.
    pub total: f64,
}

impl Quote {
    /// Returns this quote with a heavy-handling fee applied and the total
    /// recomputed. The base shipping and pickup figures are untouched.
    #[must_use]
    pub fn with_heavy_fee(self, fee: f64) -> Self {
        let surcharge = round_cents(fee);
        Self {
            surcharge,
            total: self.shipping_cost + self.pickup_fee + surcharge,
            ..self
        }
    }
}

/// Quotation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    /// The cargo description cannot describe a real shipment.
    #[error("invalid cargo specification: {reason}")]
    InvalidCargoSpec {
        /// Human-readable explanation, safe to echo to the submitter.
        reason: String,
    },
}

/// Computes the authoritative cost estimate for a cargo description.
///
/// Pure and side-effect free. This is the single pricing code path: the
/// read-only preview endpoint and the persisted submission both go through
/// here, so the two can never drift.
///
/// # Errors
///
/// Returns [`QuoteError::InvalidCargoSpec`] for a non-positive custom
/// dimension or a zero quantity.
pub fn quote(
    cargo: &CargoDescription,
    pickup: &Pickup,
    cfg: &PricingConfig,
) -> Result<Quote, QuoteError> {
    if cargo.quantity == 0 {
        return Err(QuoteError::InvalidCargoSpec {
            reason: "quantity must be at least 1".to_string(),
        });
    }
    let quantity = f64::from(cargo.quantity);
    let volume_in3 = cargo.spec.unit_volume_in3()? * quantity;
    let volume_ft3 = volume_in3 / IN3_PER_FT3;

    let shipping_cost = round_cents(volume_in3 * cfg.rate_per_in3);
    let pickup_fee = round_cents(match pickup {
        Pickup::InZone => cfg.in_zone_stop_fee,
        Pickup::OutOfZone { .. } => {
            cfg.out_of_zone_base_fee + cfg.out_of_zone_per_item_fee * quantity
        },
    });

    Ok(Quote {
        volume_in3,
        volume_ft3,
        shipping_cost,
        pickup_fee,
        surcharge: 0.0,
        total: shipping_cost + pickup_fee,
    })
}

// =============================================================================
// Heavy-item surcharge (optional secondary policy)
// =============================================================================

/// One tier of a tiered heavy-handling fee table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurchargeTier {
    /// Upper weight bound for this tier in pounds; `None` means unbounded.
    pub up_to_lb: Option<f64>,
    /// Fee charged when the weight falls in this tier.
    pub fee: f64,
}

/// How the heavy-handling fee is computed once the threshold is crossed.
///
/// Three candidate formulas exist in the product and none is authoritative
/// yet, so the choice is deployment configuration rather than a hard-coded
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HeavyFeePolicy {
    /// A single flat fee.
    Flat {
        /// The fee.
        fee: f64,
    },
    /// A per-pound rate applied to the weight above the threshold.
    PerPoundOver {
        /// Dollars per pound over the threshold.
        rate_per_lb: f64,
    },
    /// A fee table keyed by total weight.
    Tiered {
        /// Tiers checked in order; the first whose bound covers the weight
        /// wins.
        tiers: Vec<SurchargeTier>,
    },
}

/// An optional pricing rule applied after the base quote.
///
/// The engine supports zero or one such rule; it never participates in the
/// base formula.
#[derive(Debug, Clone, PartialEq)]
pub struct HeavySurcharge {
    /// Weight strictly above which the rule applies, in pounds.
    pub threshold_lb: f64,
    /// Fee formula.
    pub policy: HeavyFeePolicy,
}

impl HeavySurcharge {
    /// The flat-fee variant with the product's default constants.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            threshold_lb: DEFAULT_HEAVY_THRESHOLD_LB,
            policy: HeavyFeePolicy::Flat {
                fee: DEFAULT_HEAVY_FLAT_FEE,
            },
        }
    }

    /// The per-pound variant with the product's default constants.
    #[must_use]
    pub fn per_pound_over() -> Self {
        Self {
            threshold_lb: DEFAULT_HEAVY_THRESHOLD_LB,
            policy: HeavyFeePolicy::PerPoundOver {
                rate_per_lb: DEFAULT_HEAVY_PER_LB_FEE,
            },
        }
    }

    /// The tiered variant with the product's default fee table.
    #[must_use]
    pub fn tiered() -> Self {
        Self {
            threshold_lb: DEFAULT_HEAVY_THRESHOLD_LB,
            policy: HeavyFeePolicy::Tiered {
                tiers: vec![
                    SurchargeTier {
                        up_to_lb: Some(200.0),
                        fee: 50.0,
                    },
                    SurchargeTier {
                        up_to_lb: Some(300.0),
                        fee: 100.0,
                    },
                    SurchargeTier {
                        up_to_lb: None,
                        fee: 150.0,
                    },
                ],
            },
        }
    }

    /// Fee for the given weight; zero at or below the threshold.
    #[must_use]
    pub fn fee_for(&self, weight_lb: f64) -> f64 {
        if !(weight_lb > self.threshold_lb) {
            return 0.0;
        }
        match &self.policy {
            HeavyFeePolicy::Flat { fee } => round_cents(*fee),
            HeavyFeePolicy::PerPoundOver { rate_per_lb } => {
                round_cents((weight_lb - self.threshold_lb) * rate_per_lb)
            },
            HeavyFeePolicy::Tiered { tiers } => tiers
                .iter()
                .find(|tier| tier.up_to_lb.map_or(true, |max| weight_lb <= max))
                .map_or(0.0, |tier| round_cents(tier.fee)),
        }
    }
}
