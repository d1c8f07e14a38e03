//! Pledge intake pipeline.
//!
//! The single authoritative entry point for recording a pledge. Every
//! submission runs the same fixed sequence, each step short-circuiting on
//! failure:
//!
//! ```text
//! admit (rate limit) -> validate identity -> pool open check ->
//! duplicate check -> authoritative re-quote -> persist -> notify
//! ```
//!
//! The persist step is the durability boundary: once the insert succeeds the
//! submission has succeeded, and everything after it (submitter confirmation,
//! admin summary) is best-effort: failures there are logged and absorbed,
//! never surfaced, and never roll the insert back.
//!
//! # Duplicate handling
//!
//! The pre-insert lookup is the fast path that reports a duplicate before a
//! quote is even computed. It is not the guarantee: concurrent identical
//! submissions can both pass it, so the store enforces uniqueness over
//! `(pool, lowercased email)` for active pledges and reports a violation as
//! [`InsertError::DuplicateEmail`], which the pipeline maps to the same
//! [`IntakeError::DuplicatePledge`] the fast path produces.
//!
//! # Quote authority
//!
//! Client-computed quote figures on the wire are advisory and discarded;
//! the persisted figures always come from [`crate::quote::quote`] applied to
//! the validated raw cargo fields. The read-only preview goes through the
//! identical code path ([`IntakePipeline::preview`]), so preview and
//! submission cannot drift.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pledge::{AdminPledgeUpdate, NewPledge, PledgeId, PledgeStatus};
use crate::pool::PoolSummary;
use crate::pricing::PricingSource;
use crate::quote::{quote, HeavySurcharge, Quote, QuoteError};
use crate::ratelimit::{RateLimiter, RateLimiterConfig};
use crate::submission::{
    validate_identity, validate_quote_request, QuoteIntent, RawQuoteRequest, RawSubmission,
    SubmissionIdentity, ValidationError,
};

/// Default per-minute ceiling for pledge submissions.
pub const DEFAULT_SUBMIT_CEILING: u32 = 10;

/// Default per-minute ceiling for quotation previews. Previews are cheap and
/// front-end calculators fire them on every keystroke, so the ceiling is
/// looser than the submission one.
pub const DEFAULT_PREVIEW_CEILING: u32 = 60;

// =============================================================================
// Errors
// =============================================================================

/// Opaque storage-layer failure. The underlying cause is logged by the
/// store; callers see only that persistence failed.
#[derive(Debug, Error)]
#[error("storage failure: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Wraps a storage-layer error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Insert outcome distinguishing the authoritative duplicate signal from
/// other storage failures.
#[derive(Debug, Error)]
pub enum InsertError {
    /// The storage uniqueness constraint over `(pool, lowercased email)`
    /// rejected the row.
    #[error("an active pledge for this pool and email already exists")]
    DuplicateEmail,
    /// Any other persistence failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Notification-layer failure. Absorbed by the pipeline; only ever logged.
#[derive(Debug, Error)]
#[error("notification failure: {0}")]
pub struct NotifyError(pub String);

/// Why a submission was refused or failed.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The client exceeded its submission ceiling.
    #[error("too many requests")]
    TooManyRequests,
    /// The submission shape is invalid; `field` names the offending input.
    #[error("invalid submission: {field}: {message}")]
    InvalidSubmission {
        /// Wire-level field path.
        field: &'static str,
        /// Human-readable message, safe to echo.
        message: String,
    },
    /// The cargo description cannot describe a real shipment.
    #[error("invalid cargo specification: {reason}")]
    InvalidCargoSpec {
        /// Human-readable message, safe to echo.
        reason: String,
    },
    /// The pool is missing or no longer collecting.
    #[error("pool is not accepting pledges")]
    PoolNotAcceptingPledges,
    /// An active pledge with this email already exists in this pool.
    #[error("a pledge for this email already exists in this pool")]
    DuplicatePledge,
    /// Persistence failed; not client-fixable.
    #[error("storage failure")]
    Storage(#[source] StoreError),
}

impl From<ValidationError> for IntakeError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidSubmission {
            field: err.field,
            message: err.message,
        }
    }
}

impl From<QuoteError> for IntakeError {
    fn from(err: QuoteError) -> Self {
        match err {
            QuoteError::InvalidCargoSpec { reason } => Self::InvalidCargoSpec { reason },
        }
    }
}

impl From<StoreError> for IntakeError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

/// Why an administrative pledge update was refused.
#[derive(Debug, Error)]
pub enum AdminUpdateError {
    /// No pledge with that identity.
    #[error("pledge not found")]
    NotFound,
    /// The lifecycle does not allow this transition.
    #[error("cannot transition pledge from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current status.
        from: PledgeStatus,
        /// Requested status.
        to: PledgeStatus,
    },
    /// The update changes nothing.
    #[error("nothing to update")]
    EmptyUpdate,
    /// Persistence failed.
    #[error("storage failure")]
    Storage(#[from] StoreError),
}

// =============================================================================
// Collaborator seams
// =============================================================================

/// Read-only pool lookup. Pools are owned by the surrounding product.
#[async_trait]
pub trait PoolDirectory: Send + Sync {
    /// Returns the pool's intake-relevant slice, or `None` when no such
    /// pool exists.
    async fn pool_summary(&self, id: Uuid) -> Result<Option<PoolSummary>, StoreError>;
}

/// The transactional pledge record store.
#[async_trait]
pub trait PledgeStore: Send + Sync {
    /// Returns the id of an active (non-withdrawn) pledge with this
    /// normalized email in this pool, if any.
    async fn find_active_by_email(
        &self,
        pool_id: Uuid,
        email_lower: &str,
    ) -> Result<Option<PledgeId>, StoreError>;

    /// Inserts a new pledge in `Pledged` status and returns its identity.
    ///
    /// Implementations must enforce uniqueness over `(pool, lowercased
    /// email)` for active pledges and report a violation as
    /// [`InsertError::DuplicateEmail`].
    async fn insert(&self, pledge: NewPledge) -> Result<PledgeId, InsertError>;

    /// Returns the current status of a pledge, or `None` when it does not
    /// exist.
    async fn pledge_status(&self, id: PledgeId) -> Result<Option<PledgeStatus>, StoreError>;

    /// Applies an administrative update. The caller has already validated
    /// the transition; implementations just write.
    async fn apply_admin_update(
        &self,
        id: PledgeId,
        update: &AdminPledgeUpdate,
    ) -> Result<(), StoreError>;
}

/// Submitter confirmation payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationNotice {
    /// Recipient email.
    pub to: String,
    /// Submitter name.
    pub name: String,
    /// Pool display title.
    pub pool_title: String,
    /// The authoritative quote.
    pub quote: Quote,
}

/// Operator summary payload. Recipients are the notifier's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminNotice {
    /// Pool display title.
    pub pool_title: String,
    /// Submitter name.
    pub name: String,
    /// Submitter email.
    pub email: String,
    /// The authoritative quote.
    pub quote: Quote,
}

/// Downstream notification sender. Fire-and-forget from the pipeline's
/// perspective: implementations may enqueue and return immediately, and any
/// error they do report is logged, not propagated.
#[async_trait]
pub trait PledgeNotifier: Send + Sync {
    /// Sends the submitter their confirmation.
    async fn pledge_confirmation(&self, notice: ConfirmationNotice) -> Result<(), NotifyError>;

    /// Sends the configured operators a summary.
    async fn admin_summary(&self, notice: AdminNotice) -> Result<(), NotifyError>;
}

// =============================================================================
// Pipeline
// =============================================================================

/// Rate-limit ceilings for the two public entry points.
#[derive(Debug, Clone)]
pub struct IntakeLimits {
    /// Ceiling for pledge submissions.
    pub submit: RateLimiterConfig,
    /// Ceiling for quotation previews.
    pub preview: RateLimiterConfig,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            submit: RateLimiterConfig::per_minute(DEFAULT_SUBMIT_CEILING),
            preview: RateLimiterConfig::per_minute(DEFAULT_PREVIEW_CEILING),
        }
    }
}

/// The pledge intake orchestrator.
///
/// Construct once at process start and share behind an `Arc`; the embedded
/// rate limiters are the engine's only shared mutable state.
pub struct IntakePipeline {
    pools: Arc<dyn PoolDirectory>,
    pledges: Arc<dyn PledgeStore>,
    notifier: Arc<dyn PledgeNotifier>,
    pricing: Arc<dyn PricingSource>,
    submit_limiter: RateLimiter,
    preview_limiter: RateLimiter,
    surcharge: Option<HeavySurcharge>,
}

impl IntakePipeline {
    /// Wires the pipeline to its collaborators.
    #[must_use]
    pub fn new(
        pools: Arc<dyn PoolDirectory>,
        pledges: Arc<dyn PledgeStore>,
        notifier: Arc<dyn PledgeNotifier>,
        pricing: Arc<dyn PricingSource>,
        limits: IntakeLimits,
    ) -> Self {
        Self {
            pools,
            pledges,
            notifier,
            pricing,
            submit_limiter: RateLimiter::new(limits.submit),
            preview_limiter: RateLimiter::new(limits.preview),
            surcharge: None,
        }
    }

    /// Enables the optional heavy-item surcharge rule. At most one rule is
    /// supported.
    #[must_use]
    pub fn with_surcharge(mut self, rule: HeavySurcharge) -> Self {
        self.surcharge = Some(rule);
        self
    }

    /// The single shared pricing path for preview and submission.
    fn price(&self, intent: &QuoteIntent) -> Result<Quote, IntakeError> {
        let cfg = self.pricing.current();
        let base = quote(&intent.cargo, &intent.pickup, &cfg)?;
        Ok(match (&self.surcharge, intent.weight_lb) {
            (Some(rule), Some(weight)) => base.with_heavy_fee(rule.fee_for(weight)),
            _ => base,
        })
    }

    /// Computes a read-only quotation. No persistence side effect.
    ///
    /// # Errors
    ///
    /// [`IntakeError::TooManyRequests`] past the preview ceiling;
    /// [`IntakeError::InvalidSubmission`] / [`IntakeError::InvalidCargoSpec`]
    /// for a request the engine cannot price.
    pub fn preview(&self, raw: &RawQuoteRequest, client: IpAddr) -> Result<Quote, IntakeError> {
        self.preview_limiter
            .admit(client)
            .map_err(|_| IntakeError::TooManyRequests)?;
        let intent = validate_quote_request(raw)?;
        self.price(&intent)
    }

    /// Records a pledge. See the module docs for the step sequence.
    ///
    /// # Errors
    ///
    /// One of the [`IntakeError`] variants; every error before
    /// [`IntakeError::Storage`] is detected before any write.
    pub async fn submit(
        &self,
        raw: &RawSubmission,
        client: IpAddr,
    ) -> Result<PledgeId, IntakeError> {
        self.submit_limiter
            .admit(client)
            .map_err(|_| IntakeError::TooManyRequests)?;

        let identity = validate_identity(raw)?;

        let pool = self
            .pools
            .pool_summary(identity.pool_id)
            .await?
            .filter(|pool| pool.status.accepts_pledges())
            .ok_or(IntakeError::PoolNotAcceptingPledges)?;

        let email_lower = identity.email_lower();
        if self
            .pledges
            .find_active_by_email(identity.pool_id, &email_lower)
            .await?
            .is_some()
        {
            return Err(IntakeError::DuplicatePledge);
        }

        // Cargo-field scrutiny happens only after the pool and duplicate
        // gates have passed; a submission to a closed pool is refused
        // without ever pricing its cargo.
        let intent = validate_quote_request(&raw.quote)?;
        let authoritative = self.price(&intent)?;

        let id = match self
            .pledges
            .insert(NewPledge {
                pool_id: identity.pool_id,
                email: identity.email.clone(),
                name: identity.name.clone(),
                phone: identity.phone.clone(),
                cargo: intent.cargo.clone(),
                pickup: intent.pickup.clone(),
                weight_lb: intent.weight_lb,
                quote: authoritative,
                notes: identity.notes.clone(),
            })
            .await
        {
            Ok(id) => id,
            Err(InsertError::DuplicateEmail) => return Err(IntakeError::DuplicatePledge),
            Err(InsertError::Storage(err)) => return Err(IntakeError::Storage(err)),
        };

        info!(pledge_id = %id, pool_id = %identity.pool_id, "pledge recorded");

        // Durability boundary passed: the submission has succeeded whatever
        // happens below.
        self.notify(&pool, &identity, authoritative).await;

        Ok(id)
    }

    async fn notify(&self, pool: &PoolSummary, identity: &SubmissionIdentity, quote: Quote) {
        if let Err(err) = self
            .notifier
            .pledge_confirmation(ConfirmationNotice {
                to: identity.email.clone(),
                name: identity.name.clone(),
                pool_title: pool.title.clone(),
                quote,
            })
            .await
        {
            warn!(error = %err, email = %identity.email, "pledge confirmation not sent");
        }

        if let Err(err) = self
            .notifier
            .admin_summary(AdminNotice {
                pool_title: pool.title.clone(),
                name: identity.name.clone(),
                email: identity.email.clone(),
                quote,
            })
            .await
        {
            warn!(error = %err, "admin pledge summary not sent");
        }
    }
}

/// Applies an administrative pledge update, enforcing the status lifecycle.
///
/// The engine never drives these transitions itself; this is the seam an
/// administrative surface calls through so the lifecycle rules live in one
/// place.
///
/// # Errors
///
/// [`AdminUpdateError::NotFound`] for an unknown pledge,
/// [`AdminUpdateError::InvalidTransition`] when the lifecycle forbids the
/// requested status change, [`AdminUpdateError::EmptyUpdate`] when the
/// update changes nothing.
pub async fn admin_update(
    store: &dyn PledgeStore,
    id: PledgeId,
    update: &AdminPledgeUpdate,
) -> Result<(), AdminUpdateError> {
    if update.is_empty() {
        return Err(AdminUpdateError::EmptyUpdate);
    }

    let current = store
        .pledge_status(id)
        .await?
        .ok_or(AdminUpdateError::NotFound)?;

    if let Some(next) = update.status {
        if !current.can_transition_to(next) {
            return Err(AdminUpdateError::InvalidTransition {
                from: current,
                to: next,
            });
        }
    }

    store.apply_admin_update(id, update).await?;
    info!(pledge_id = %id, status = ?update.status, "administrative pledge update applied");
    Ok(())
}
