//! Pool read model.
//!
//! Pools are owned by the surrounding product; the engine only reads enough
//! of one to decide whether it accepts pledges.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a pooled shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Open for pledges.
    Collecting,
    /// Enough interest gathered; container announced.
    Announced,
    /// Container being loaded.
    Loading,
    /// Container at sea.
    Shipped,
    /// Arrived at the port of entry.
    ArrivedPort,
    /// Arrived at the destination depot.
    ArrivedDestination,
    /// Customs cleared.
    Cleared,
    /// Cargo ready for pickup.
    ReadyPickup,
    /// Closed out.
    Closed,
}

impl PoolStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Collecting,
        Self::Announced,
        Self::Loading,
        Self::Shipped,
        Self::ArrivedPort,
        Self::ArrivedDestination,
        Self::Cleared,
        Self::ReadyPickup,
        Self::Closed,
    ];

    /// Pledges are accepted only while the pool is collecting.
    #[must_use]
    pub const fn accepts_pledges(self) -> bool {
        matches!(self, Self::Collecting)
    }

    /// Storage tag for this status.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Announced => "announced",
            Self::Loading => "loading",
            Self::Shipped => "shipped",
            Self::ArrivedPort => "arrived_port",
            Self::ArrivedDestination => "arrived_destination",
            Self::Cleared => "cleared",
            Self::ReadyPickup => "ready_pickup",
            Self::Closed => "closed",
        }
    }

    /// Resolves a storage tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_tag() == tag)
    }
}

/// The slice of a pool the intake pipeline needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSummary {
    /// Pool identity.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: PoolStatus,
    /// Display title, used in notifications.
    pub title: String,
}
