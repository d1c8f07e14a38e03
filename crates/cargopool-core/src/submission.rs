//! Inbound submission shapes and validation.
//!
//! The wire shape ([`RawSubmission`], [`RawQuoteRequest`]) is all-optional:
//! whatever the transport parsed is accepted as-is, and [`validate`] turns it
//! into the typed form or fails fast with the first violated rule. Errors
//! carry a machine-distinguishable field path plus a message safe to echo to
//! the submitter.
//!
//! Validation is pure shape checking. It never touches persistent state, so
//! it can run before any storage round trip.
//!
//! Client-computed quote figures arrive on the wire for compatibility with
//! older front ends but are deliberately not represented in the validated
//! output: the pipeline recomputes the authoritative quote from the raw
//! cargo fields every time.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::quote::{BoxCode, CargoDescription, CargoSpec, EstimateCategory, Pickup};

/// Upper bound on submitter name length.
pub const MAX_NAME_LEN: usize = 200;

/// Upper bound on email length (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

/// Upper bound on phone length.
pub const MAX_PHONE_LEN: usize = 50;

/// Upper bound on the out-of-zone city label.
pub const MAX_CITY_LEN: usize = 120;

/// Upper bound on free-text notes.
pub const MAX_NOTES_LEN: usize = 2000;

/// Upper bound on item quantity. Abuse hygiene; a genuine pledge of more
/// items than this does not fit a container anyway.
pub const MAX_QUANTITY: i64 = 1_000;

/// Upper bound on a single custom dimension in inches.
pub const MAX_DIMENSION_IN: f64 = 1_000.0;

/// Upper bound on declared weight in pounds.
pub const MAX_WEIGHT_LB: f64 = 20_000.0;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)] // static pattern, cannot fail at runtime
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
    })
}

/// A violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Wire-level field path the rule applies to.
    pub field: &'static str,
    /// Human-readable message, safe to echo to the submitter.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// The untyped cargo/pickup/quantity fields shared by the quotation preview
/// and the pledge submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuoteRequest {
    /// `in_zone` or `out_of_zone`.
    pub pickup_zone: Option<String>,
    /// City label for an out-of-zone pickup.
    pub pickup_city: Option<String>,
    /// `standard_box`, `custom_dims`, or `estimate`.
    pub cargo_mode: Option<String>,
    /// Box code when `cargo_mode == standard_box`.
    pub standard_box_code: Option<String>,
    /// Custom length in inches when `cargo_mode == custom_dims`.
    pub length_in: Option<f64>,
    /// Custom width in inches.
    pub width_in: Option<f64>,
    /// Custom height in inches.
    pub height_in: Option<f64>,
    /// Size category when `cargo_mode == estimate`.
    pub estimate_category: Option<String>,
    /// Item count.
    pub quantity: Option<i64>,
    /// Optional declared weight in pounds; feeds the heavy-item surcharge
    /// when one is configured.
    pub weight_lb: Option<f64>,
}

/// The untyped pledge submission as it arrives on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubmission {
    /// Target pool identifier.
    pub pool_id: Option<String>,
    /// Submitter email.
    pub user_email: Option<String>,
    /// Submitter name.
    pub user_name: Option<String>,
    /// Optional contact phone.
    pub user_phone: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Cargo, pickup and quantity fields.
    #[serde(flatten)]
    pub quote: RawQuoteRequest,
    /// Advisory client-computed volume; ignored.
    pub computed_in3: Option<f64>,
    /// Advisory client-computed volume; ignored.
    pub computed_ft3: Option<f64>,
    /// Advisory client-computed shipping cost; ignored.
    pub est_shipping_cost: Option<f64>,
    /// Advisory client-computed pickup fee; ignored.
    pub est_pickup_fee: Option<f64>,
}

/// Validated identity/contact half of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionIdentity {
    /// Target pool.
    pub pool_id: Uuid,
    /// Trimmed submitter email, original casing preserved.
    pub email: String,
    /// Trimmed submitter name.
    pub name: String,
    /// Trimmed phone, when present.
    pub phone: Option<String>,
    /// Trimmed notes, when present.
    pub notes: Option<String>,
}

impl SubmissionIdentity {
    /// The normalized form duplicate detection and storage uniqueness run
    /// over.
    #[must_use]
    pub fn email_lower(&self) -> String {
        self.email.to_lowercase()
    }
}

/// Validated cargo/pickup half of a submission: everything the quotation
/// engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteIntent {
    /// Typed cargo description.
    pub cargo: CargoDescription,
    /// Typed pickup choice.
    pub pickup: Pickup,
    /// Declared weight, when supplied and plausible.
    pub weight_lb: Option<f64>,
}

/// A fully validated pledge submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PledgeSubmission {
    /// Who is pledging, and into which pool.
    pub identity: SubmissionIdentity,
    /// What they are pledging.
    pub intent: QuoteIntent,
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bounded(
    field: &'static str,
    value: Option<String>,
    max_len: usize,
) -> Result<Option<String>, ValidationError> {
    match value {
        Some(s) if s.len() > max_len => Err(ValidationError::new(
            field,
            format!("must be at most {max_len} characters"),
        )),
        other => Ok(other),
    }
}

/// Validates the identity/contact fields of a submission.
///
/// # Errors
///
/// Returns the first violated rule with its field path.
pub fn validate_identity(raw: &RawSubmission) -> Result<SubmissionIdentity, ValidationError> {
    let pool_id = raw
        .pool_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::new("pool_id", "pool identifier required"))?;
    let pool_id = Uuid::parse_str(pool_id)
        .map_err(|_| ValidationError::new("pool_id", "not a valid pool identifier"))?;

    let email = trimmed(raw.user_email.as_ref())
        .ok_or_else(|| ValidationError::new("user_email", "valid email required"))?;
    if email.len() > MAX_EMAIL_LEN || !email_pattern().is_match(&email) {
        return Err(ValidationError::new("user_email", "valid email required"));
    }

    let name = trimmed(raw.user_name.as_ref())
        .ok_or_else(|| ValidationError::new("user_name", "name required"))?;
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            "user_name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }

    let phone = bounded("user_phone", trimmed(raw.user_phone.as_ref()), MAX_PHONE_LEN)?;
    let notes = bounded("notes", trimmed(raw.notes.as_ref()), MAX_NOTES_LEN)?;

    Ok(SubmissionIdentity {
        pool_id,
        email,
        name,
        phone,
        notes,
    })
}

fn validate_dimension(field: &'static str, value: Option<f64>) -> Result<f64, ValidationError> {
    let dim =
        value.ok_or_else(|| ValidationError::new(field, "length, width, and height required"))?;
    if !dim.is_finite() || dim <= 0.0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    if dim > MAX_DIMENSION_IN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_DIMENSION_IN} inches"),
        ));
    }
    Ok(dim)
}

/// Validates the cargo/pickup/quantity fields shared by preview and
/// submission.
///
/// # Errors
///
/// Returns the first violated rule with its field path.
pub fn validate_quote_request(raw: &RawQuoteRequest) -> Result<QuoteIntent, ValidationError> {
    let zone = raw
        .pickup_zone
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::new("pickup_zone", "pickup zone required"))?;
    let pickup = match zone {
        "in_zone" => Pickup::InZone,
        "out_of_zone" => Pickup::OutOfZone {
            city: bounded("pickup_city", trimmed(raw.pickup_city.as_ref()), MAX_CITY_LEN)?,
        },
        _ => {
            return Err(ValidationError::new(
                "pickup_zone",
                "must be in_zone or out_of_zone",
            ))
        },
    };

    let mode = raw
        .cargo_mode
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::new("cargo_mode", "cargo mode required"))?;
    let spec = match mode {
        "standard_box" => {
            let code = raw
                .standard_box_code
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ValidationError::new("standard_box_code", "select a box size"))?;
            let code = BoxCode::from_tag(code)
                .ok_or_else(|| ValidationError::new("standard_box_code", "unknown box size"))?;
            CargoSpec::StandardBox { code }
        },
        "custom_dims" => CargoSpec::CustomDims {
            length_in: validate_dimension("length_in", raw.length_in)?,
            width_in: validate_dimension("width_in", raw.width_in)?,
            height_in: validate_dimension("height_in", raw.height_in)?,
        },
        "estimate" => {
            let category = raw
                .estimate_category
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ValidationError::new("estimate_category", "select a size category")
                })?;
            let category = EstimateCategory::from_tag(category).ok_or_else(|| {
                ValidationError::new("estimate_category", "unknown size category")
            })?;
            CargoSpec::Estimate { category }
        },
        _ => {
            return Err(ValidationError::new(
                "cargo_mode",
                "must be standard_box, custom_dims, or estimate",
            ))
        },
    };

    let quantity = raw
        .quantity
        .ok_or_else(|| ValidationError::new("quantity", "quantity required"))?;
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(ValidationError::new(
            "quantity",
            format!("must be between 1 and {MAX_QUANTITY}"),
        ));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let quantity = quantity as u32; // bounded above

    let weight_lb = match raw.weight_lb {
        None => None,
        Some(w) if w.is_finite() && w > 0.0 && w <= MAX_WEIGHT_LB => Some(w),
        Some(_) => {
            return Err(ValidationError::new(
                "weight_lb",
                format!("must be between 0 and {MAX_WEIGHT_LB} pounds"),
            ))
        },
    };

    Ok(QuoteIntent {
        cargo: CargoDescription { spec, quantity },
        pickup,
        weight_lb,
    })
}

/// Validates a complete pledge submission: identity first, then the cargo
/// fields, failing fast on the first violated rule.
///
/// # Errors
///
/// Returns the first violated rule with its field path.
pub fn validate(raw: &RawSubmission) -> Result<PledgeSubmission, ValidationError> {
    let identity = validate_identity(raw)?;
    let intent = validate_quote_request(&raw.quote)?;
    Ok(PledgeSubmission { identity, intent })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_raw() -> RawSubmission {
        RawSubmission {
            pool_id: Some(Uuid::nil().to_string()),
            user_email: Some("Jane@Example.com".to_string()),
            user_name: Some("Jane Banda".to_string()),
            user_phone: Some("+260 97 000 0000".to_string()),
            notes: None,
            quote: RawQuoteRequest {
                pickup_zone: Some("in_zone".to_string()),
                cargo_mode: Some("standard_box".to_string()),
                standard_box_code: Some("M".to_string()),
                quantity: Some(2),
                ..RawQuoteRequest::default()
            },
            ..RawSubmission::default()
        }
    }

    #[test]
    fn test_valid_submission_passes() {
        let sub = validate(&valid_raw()).unwrap();
        assert_eq!(sub.identity.email, "Jane@Example.com");
        assert_eq!(sub.identity.email_lower(), "jane@example.com");
        assert_eq!(sub.intent.cargo.quantity, 2);
        assert_eq!(
            sub.intent.cargo.spec,
            CargoSpec::StandardBox { code: BoxCode::M }
        );
        assert_eq!(sub.intent.pickup, Pickup::InZone);
    }

    #[test]
    fn test_missing_pool_id_fails_first() {
        let mut raw = valid_raw();
        raw.pool_id = None;
        raw.user_email = None; // also invalid, but pool_id is checked first
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field, "pool_id");
    }

    #[test]
    fn test_malformed_pool_id_rejected() {
        let mut raw = valid_raw();
        raw.pool_id = Some("not-a-uuid".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "pool_id");
    }

    #[test]
    fn test_email_syntax() {
        for bad in ["", "plain", "a@b", "a b@c.com", "@example.com"] {
            let mut raw = valid_raw();
            raw.user_email = Some(bad.to_string());
            assert_eq!(validate(&raw).unwrap_err().field, "user_email", "{bad:?}");
        }
        let mut raw = valid_raw();
        raw.user_email = Some("  jane@example.com  ".to_string());
        assert_eq!(validate(&raw).unwrap().identity.email, "jane@example.com");
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut raw = valid_raw();
        raw.user_name = Some("   ".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "user_name");
    }

    #[test]
    fn test_unknown_pickup_zone_rejected() {
        let mut raw = valid_raw();
        raw.quote.pickup_zone = Some("suburbs".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "pickup_zone");
    }

    #[test]
    fn test_out_of_zone_keeps_city_label() {
        let mut raw = valid_raw();
        raw.quote.pickup_zone = Some("out_of_zone".to_string());
        raw.quote.pickup_city = Some("  Ndola ".to_string());
        let sub = validate(&raw).unwrap();
        assert_eq!(
            sub.intent.pickup,
            Pickup::OutOfZone {
                city: Some("Ndola".to_string())
            }
        );
    }

    #[test]
    fn test_standard_box_requires_known_code() {
        let mut raw = valid_raw();
        raw.quote.standard_box_code = None;
        assert_eq!(validate(&raw).unwrap_err().field, "standard_box_code");

        let mut raw = valid_raw();
        raw.quote.standard_box_code = Some("XXL".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "standard_box_code");
    }

    #[test]
    fn test_custom_dims_require_all_three_positive() {
        let mut raw = valid_raw();
        raw.quote.cargo_mode = Some("custom_dims".to_string());
        raw.quote.length_in = Some(10.0);
        raw.quote.width_in = Some(0.0);
        raw.quote.height_in = Some(10.0);
        assert_eq!(validate(&raw).unwrap_err().field, "width_in");

        raw.quote.width_in = None;
        assert_eq!(validate(&raw).unwrap_err().field, "width_in");

        raw.quote.width_in = Some(10.0);
        let sub = validate(&raw).unwrap();
        assert_eq!(
            sub.intent.cargo.spec,
            CargoSpec::CustomDims {
                length_in: 10.0,
                width_in: 10.0,
                height_in: 10.0
            }
        );
    }

    #[test]
    fn test_estimate_requires_known_category() {
        let mut raw = valid_raw();
        raw.quote.cargo_mode = Some("estimate".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "estimate_category");

        raw.quote.estimate_category = Some("gigantic".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "estimate_category");

        raw.quote.estimate_category = Some("large".to_string());
        assert_eq!(
            validate(&raw).unwrap().intent.cargo.spec,
            CargoSpec::Estimate {
                category: EstimateCategory::Large
            }
        );
    }

    #[test]
    fn test_unknown_cargo_mode_rejected() {
        let mut raw = valid_raw();
        raw.quote.cargo_mode = Some("pallet".to_string());
        assert_eq!(validate(&raw).unwrap_err().field, "cargo_mode");
    }

    #[test]
    fn test_quantity_bounds() {
        for bad in [None, Some(0), Some(-3), Some(MAX_QUANTITY + 1)] {
            let mut raw = valid_raw();
            raw.quote.quantity = bad;
            assert_eq!(validate(&raw).unwrap_err().field, "quantity", "{bad:?}");
        }
    }

    #[test]
    fn test_weight_bounds() {
        for bad in [0.0, -10.0, f64::NAN, MAX_WEIGHT_LB + 1.0] {
            let mut raw = valid_raw();
            raw.quote.weight_lb = Some(bad);
            assert_eq!(validate(&raw).unwrap_err().field, "weight_lb", "{bad:?}");
        }
        let mut raw = valid_raw();
        raw.quote.weight_lb = Some(180.0);
        assert_eq!(validate(&raw).unwrap().intent.weight_lb, Some(180.0));
    }

    #[test]
    fn test_advisory_quote_fields_are_not_represented_in_output() {
        let mut raw = valid_raw();
        raw.computed_in3 = Some(1.0);
        raw.computed_ft3 = Some(1.0);
        raw.est_shipping_cost = Some(0.01);
        raw.est_pickup_fee = Some(0.01);
        // The validated submission carries only raw cargo fields; there is
        // nowhere for client-computed figures to flow onward.
        let _sub = validate(&raw).unwrap();
    }

    #[test]
    fn test_wire_shape_parses_flat_json() {
        let json = serde_json::json!({
            "pool_id": Uuid::nil().to_string(),
            "user_email": "jane@example.com",
            "user_name": "Jane",
            "pickup_zone": "out_of_zone",
            "pickup_city": "Ndola",
            "cargo_mode": "custom_dims",
            "length_in": 10,
            "width_in": 12,
            "height_in": 14,
            "quantity": 3,
            "est_shipping_cost": 1.23
        });
        let raw: RawSubmission = serde_json::from_value(json).unwrap();
        assert_eq!(raw.quote.quantity, Some(3));
        assert_eq!(raw.est_shipping_cost, Some(1.23));
        let sub = validate(&raw).unwrap();
        assert_eq!(sub.intent.cargo.quantity, 3);
    }
}
