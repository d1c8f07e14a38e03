//! Pledge records and their lifecycle.
//!
//! A pledge is one submitter's reservation of cargo space in a pool plus
//! the computed cost estimate that was current when they submitted. Pledges
//! are created only through the intake pipeline, always in [`PledgeStatus::Pledged`],
//! and are never deleted: withdrawal is a status, not a row removal, which
//! keeps the pool's history replayable.
//!
//! Status transitions are administrative actions; the engine merely refuses
//! the ones the lifecycle does not allow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quote::{CargoDescription, Pickup, Quote};

/// Identity of a durable pledge record, generated at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PledgeId(pub Uuid);

impl PledgeId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Pledge lifecycle.
///
/// `Pledged -> Confirmed -> Shipped`, with `Withdrawn` reachable from
/// `Pledged` or `Confirmed`. `Shipped` and `Withdrawn` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    /// Interest recorded; no commitment yet.
    Pledged,
    /// Submitter confirmed once the container was announced.
    Confirmed,
    /// Submitter pulled out.
    Withdrawn,
    /// Cargo went out with the container.
    Shipped,
}

impl PledgeStatus {
    /// All statuses.
    pub const ALL: [Self; 4] = [Self::Pledged, Self::Confirmed, Self::Withdrawn, Self::Shipped];

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Identity transitions are not allowed; an administrative update that
    /// would change nothing is rejected rather than silently accepted.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pledged, Self::Confirmed)
                | (Self::Pledged, Self::Withdrawn)
                | (Self::Confirmed, Self::Shipped)
                | (Self::Confirmed, Self::Withdrawn)
        )
    }

    /// A withdrawn pledge no longer holds space and no longer blocks the
    /// submitter's email from pledging again.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Withdrawn)
    }

    /// Storage tag for this status.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Pledged => "pledged",
            Self::Confirmed => "confirmed",
            Self::Withdrawn => "withdrawn",
            Self::Shipped => "shipped",
        }
    }

    /// Resolves a storage tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_tag() == tag)
    }
}

/// A pledge as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pledge {
    /// Record identity.
    pub id: PledgeId,
    /// The pool this pledge reserves space in.
    pub pool_id: Uuid,
    /// Submitter email as given. The lowercased form is what uniqueness is
    /// enforced over.
    pub email: String,
    /// Submitter name.
    pub name: String,
    /// Optional contact phone.
    pub phone: Option<String>,
    /// The raw cargo description the quote was computed from.
    pub cargo: CargoDescription,
    /// Pickup choice.
    pub pickup: Pickup,
    /// Declared weight, when the submitter supplied one.
    pub weight_lb: Option<f64>,
    /// The quote computed at submission time. Persisted, not recomputed on
    /// read; replaying the engine over the raw fields must reproduce it.
    pub quote: Quote,
    /// Marks cargo the pool operator ships for itself.
    pub is_internal_cargo: bool,
    /// Free-text notes from the submitter.
    pub notes: Option<String>,
    /// Lifecycle status.
    pub status: PledgeStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new pledge. The store assigns the identity,
/// `Pledged` status, and creation timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPledge {
    /// Target pool.
    pub pool_id: Uuid,
    /// Submitter email as given.
    pub email: String,
    /// Submitter name.
    pub name: String,
    /// Optional contact phone.
    pub phone: Option<String>,
    /// Raw cargo description.
    pub cargo: CargoDescription,
    /// Pickup choice.
    pub pickup: Pickup,
    /// Declared weight, if any.
    pub weight_lb: Option<f64>,
    /// The authoritative server-computed quote.
    pub quote: Quote,
    /// Free-text notes.
    pub notes: Option<String>,
}

/// An administrative mutation: status, internal-cargo flag, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminPledgeUpdate {
    /// New lifecycle status, validated against the state machine.
    pub status: Option<PledgeStatus>,
    /// New internal-cargo flag.
    pub is_internal_cargo: Option<bool>,
}

impl AdminPledgeUpdate {
    /// An update that changes nothing is a caller error.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none() && self.is_internal_cargo.is_none()
    }
}
