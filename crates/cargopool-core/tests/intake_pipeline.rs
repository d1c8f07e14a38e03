//! End-to-end pipeline tests over in-memory collaborator fakes.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cargopool_core::intake::{
    admin_update, AdminNotice, AdminUpdateError, ConfirmationNotice, InsertError, IntakeError,
    IntakeLimits, IntakePipeline, NotifyError, PledgeNotifier, PledgeStore, PoolDirectory,
    StoreError,
};
use cargopool_core::pledge::{AdminPledgeUpdate, NewPledge, Pledge, PledgeId, PledgeStatus};
use cargopool_core::pool::{PoolStatus, PoolSummary};
use cargopool_core::pricing::PricingConfig;
use cargopool_core::quote::{quote, HeavySurcharge};
use cargopool_core::ratelimit::RateLimiterConfig;
use cargopool_core::submission::{RawQuoteRequest, RawSubmission};
use chrono::Utc;
use uuid::Uuid;

const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
const OTHER_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

#[derive(Default)]
struct FakePools {
    pools: HashMap<Uuid, PoolSummary>,
}

impl FakePools {
    fn with_pool(id: Uuid, status: PoolStatus) -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            id,
            PoolSummary {
                id,
                status,
                title: "Lusaka March container".to_string(),
            },
        );
        Self { pools }
    }
}

#[async_trait]
impl PoolDirectory for FakePools {
    async fn pool_summary(&self, id: Uuid) -> Result<Option<PoolSummary>, StoreError> {
        Ok(self.pools.get(&id).cloned())
    }
}

#[derive(Default)]
struct FakeStore {
    pledges: Mutex<Vec<Pledge>>,
    fail_inserts: AtomicBool,
    force_duplicate_on_insert: AtomicBool,
}

impl FakeStore {
    fn recorded(&self) -> Vec<Pledge> {
        self.pledges.lock().unwrap().clone()
    }
}

#[async_trait]
impl PledgeStore for FakeStore {
    async fn find_active_by_email(
        &self,
        pool_id: Uuid,
        email_lower: &str,
    ) -> Result<Option<PledgeId>, StoreError> {
        Ok(self
            .pledges
            .lock()
            .unwrap()
            .iter()
            .find(|p| {
                p.pool_id == pool_id
                    && p.status.is_active()
                    && p.email.to_lowercase() == email_lower
            })
            .map(|p| p.id))
    }

    async fn insert(&self, pledge: NewPledge) -> Result<PledgeId, InsertError> {
        if self.fail_inserts.load(Ordering::Relaxed) {
            return Err(InsertError::Storage(StoreError::new("disk on fire")));
        }
        if self.force_duplicate_on_insert.load(Ordering::Relaxed) {
            return Err(InsertError::DuplicateEmail);
        }
        let id = PledgeId::generate();
        self.pledges.lock().unwrap().push(Pledge {
            id,
            pool_id: pledge.pool_id,
            email: pledge.email,
            name: pledge.name,
            phone: pledge.phone,
            cargo: pledge.cargo,
            pickup: pledge.pickup,
            weight_lb: pledge.weight_lb,
            quote: pledge.quote,
            is_internal_cargo: false,
            notes: pledge.notes,
            status: PledgeStatus::Pledged,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn pledge_status(&self, id: PledgeId) -> Result<Option<PledgeStatus>, StoreError> {
        Ok(self
            .pledges
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.status))
    }

    async fn apply_admin_update(
        &self,
        id: PledgeId,
        update: &AdminPledgeUpdate,
    ) -> Result<(), StoreError> {
        let mut pledges = self.pledges.lock().unwrap();
        let pledge = pledges
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::new("missing pledge"))?;
        if let Some(status) = update.status {
            pledge.status = status;
        }
        if let Some(flag) = update.is_internal_cargo {
            pledge.is_internal_cargo = flag;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    confirmations: Mutex<Vec<ConfirmationNotice>>,
    summaries: Mutex<Vec<AdminNotice>>,
    fail: AtomicBool,
}

#[async_trait]
impl PledgeNotifier for RecordingNotifier {
    async fn pledge_confirmation(&self, notice: ConfirmationNotice) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(NotifyError("relay down".to_string()));
        }
        self.confirmations.lock().unwrap().push(notice);
        Ok(())
    }

    async fn admin_summary(&self, notice: AdminNotice) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(NotifyError("relay down".to_string()));
        }
        self.summaries.lock().unwrap().push(notice);
        Ok(())
    }
}

struct Harness {
    pipeline: IntakePipeline,
    store: Arc<FakeStore>,
    notifier: Arc<RecordingNotifier>,
    pool_id: Uuid,
}

fn harness_with(pool_status: PoolStatus, limits: IntakeLimits) -> Harness {
    let pool_id = Uuid::new_v4();
    let store = Arc::new(FakeStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = IntakePipeline::new(
        Arc::new(FakePools::with_pool(pool_id, pool_status)),
        store.clone(),
        notifier.clone(),
        Arc::new(PricingConfig::default()),
        limits,
    );
    Harness {
        pipeline,
        store,
        notifier,
        pool_id,
    }
}

fn harness(pool_status: PoolStatus) -> Harness {
    harness_with(pool_status, IntakeLimits::default())
}

fn submission(pool_id: Uuid, email: &str) -> RawSubmission {
    RawSubmission {
        pool_id: Some(pool_id.to_string()),
        user_email: Some(email.to_string()),
        user_name: Some("Jane Banda".to_string()),
        user_phone: None,
        notes: Some("fragile".to_string()),
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

#[tokio::test]
async fn submits_and_persists_the_recomputed_quote() {
    let h = harness(PoolStatus::Collecting);
    let mut raw = submission(h.pool_id, "jane@example.com");
    // A lying client: advisory figures bear no relation to the cargo.
    raw.computed_in3 = Some(1.0);
    raw.computed_ft3 = Some(1.0);
    raw.est_shipping_cost = Some(0.01);
    raw.est_pickup_fee = Some(0.0);

    let id = h.pipeline.submit(&raw, CLIENT).await.unwrap();

    let recorded = h.store.recorded();
    assert_eq!(recorded.len(), 1);
    let pledge = &recorded[0];
    assert_eq!(pledge.id, id);
    assert_eq!(pledge.status, PledgeStatus::Pledged);

    // The persisted quote is exactly what the engine reproduces from the
    // persisted raw fields; the client's figures left no trace.
    let replayed = quote(&pledge.cargo, &pledge.pickup, &PricingConfig::default()).unwrap();
    assert_eq!(pledge.quote, replayed);
    assert_eq!(pledge.quote.shipping_cost, 400.90);
    assert_eq!(pledge.quote.pickup_fee, 25.00);
    assert_eq!(pledge.quote.total, 425.90);
}

#[tokio::test]
async fn notifies_submitter_and_operators_after_persisting() {
    let h = harness(PoolStatus::Collecting);
    let raw = submission(h.pool_id, "jane@example.com");
    h.pipeline.submit(&raw, CLIENT).await.unwrap();

    let confirmations = h.notifier.confirmations.lock().unwrap();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].to, "jane@example.com");
    assert_eq!(confirmations[0].pool_title, "Lusaka March container");

    let summaries = h.notifier.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].email, "jane@example.com");
}

#[tokio::test]
async fn notification_failure_never_fails_the_submission() {
    let h = harness(PoolStatus::Collecting);
    h.notifier.fail.store(true, Ordering::Relaxed);

    let raw = submission(h.pool_id, "jane@example.com");
    let result = h.pipeline.submit(&raw, CLIENT).await;
    assert!(result.is_ok(), "persisted pledge must win: {result:?}");
    assert_eq!(h.store.recorded().len(), 1);
}

#[tokio::test]
async fn rejects_duplicate_email_case_insensitively() {
    let h = harness(PoolStatus::Collecting);
    h.pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await
        .unwrap();

    let second = h
        .pipeline
        .submit(&submission(h.pool_id, "JANE@Example.COM"), CLIENT)
        .await;
    assert!(matches!(second, Err(IntakeError::DuplicatePledge)));
    assert_eq!(h.store.recorded().len(), 1);
}

#[tokio::test]
async fn storage_constraint_violation_is_the_authoritative_duplicate_signal() {
    // The pre-insert lookup sees nothing (simulating the race window), but
    // the store's uniqueness constraint fires on insert.
    let h = harness(PoolStatus::Collecting);
    h.store.force_duplicate_on_insert.store(true, Ordering::Relaxed);

    let result = h
        .pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await;
    assert!(matches!(result, Err(IntakeError::DuplicatePledge)));
}

#[tokio::test]
async fn closed_pool_is_refused_before_cargo_fields_are_examined() {
    let h = harness(PoolStatus::Closed);
    let mut raw = submission(h.pool_id, "jane@example.com");
    // Garbage cargo fields: a closed pool must still be the reported error.
    raw.quote.standard_box_code = Some("NONSENSE".to_string());
    raw.quote.quantity = Some(-5);

    let result = h.pipeline.submit(&raw, CLIENT).await;
    assert!(matches!(result, Err(IntakeError::PoolNotAcceptingPledges)));
}

#[tokio::test]
async fn unknown_pool_is_refused() {
    let h = harness(PoolStatus::Collecting);
    let raw = submission(Uuid::new_v4(), "jane@example.com");
    let result = h.pipeline.submit(&raw, CLIENT).await;
    assert!(matches!(result, Err(IntakeError::PoolNotAcceptingPledges)));
}

#[tokio::test]
async fn invalid_cargo_fields_surface_after_the_business_gates() {
    let h = harness(PoolStatus::Collecting);
    let mut raw = submission(h.pool_id, "jane@example.com");
    raw.quote.standard_box_code = Some("NONSENSE".to_string());

    let result = h.pipeline.submit(&raw, CLIENT).await;
    assert!(matches!(
        result,
        Err(IntakeError::InvalidSubmission {
            field: "standard_box_code",
            ..
        })
    ));
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn storage_failure_is_surfaced_opaquely() {
    let h = harness(PoolStatus::Collecting);
    h.store.fail_inserts.store(true, Ordering::Relaxed);

    let result = h
        .pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await;
    assert!(matches!(result, Err(IntakeError::Storage(_))));
}

#[tokio::test]
async fn submission_ceiling_rejects_and_window_expiry_readmits() {
    let limits = IntakeLimits {
        submit: RateLimiterConfig {
            max_requests: 2,
            window: Duration::from_secs(1),
            ..RateLimiterConfig::default()
        },
        ..IntakeLimits::default()
    };
    let h = harness_with(PoolStatus::Collecting, limits);

    h.pipeline
        .submit(&submission(h.pool_id, "a@example.com"), CLIENT)
        .await
        .unwrap();
    h.pipeline
        .submit(&submission(h.pool_id, "b@example.com"), CLIENT)
        .await
        .unwrap();

    let third = h
        .pipeline
        .submit(&submission(h.pool_id, "c@example.com"), CLIENT)
        .await;
    assert!(matches!(third, Err(IntakeError::TooManyRequests)));

    // A different client still has quota.
    h.pipeline
        .submit(&submission(h.pool_id, "d@example.com"), OTHER_CLIENT)
        .await
        .unwrap();

    // Past the window the original client is readmitted.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.pipeline
        .submit(&submission(h.pool_id, "e@example.com"), CLIENT)
        .await
        .unwrap();
}

#[tokio::test]
async fn rate_limit_is_checked_before_anything_else() {
    let limits = IntakeLimits {
        submit: RateLimiterConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            ..RateLimiterConfig::default()
        },
        ..IntakeLimits::default()
    };
    let h = harness_with(PoolStatus::Collecting, limits);
    h.pipeline
        .submit(&submission(h.pool_id, "a@example.com"), CLIENT)
        .await
        .unwrap();

    // Completely empty submission: over the ceiling, the limiter answers
    // before the validator ever runs.
    let result = h.pipeline.submit(&RawSubmission::default(), CLIENT).await;
    assert!(matches!(result, Err(IntakeError::TooManyRequests)));
}

#[tokio::test]
async fn preview_and_submission_share_one_pricing_path() {
    let h = harness(PoolStatus::Collecting);
    let raw = submission(h.pool_id, "jane@example.com");

    let previewed = h.pipeline.preview(&raw.quote, CLIENT).unwrap();
    h.pipeline.submit(&raw, CLIENT).await.unwrap();

    assert_eq!(h.store.recorded()[0].quote, previewed);
}

#[tokio::test]
async fn preview_has_no_persistence_side_effect() {
    let h = harness(PoolStatus::Collecting);
    let raw = submission(h.pool_id, "jane@example.com");
    h.pipeline.preview(&raw.quote, CLIENT).unwrap();
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn configured_surcharge_applies_when_weight_is_declared() {
    let pool_id = Uuid::new_v4();
    let store = Arc::new(FakeStore::default());
    let pipeline = IntakePipeline::new(
        Arc::new(FakePools::with_pool(pool_id, PoolStatus::Collecting)),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        Arc::new(PricingConfig::default()),
        IntakeLimits::default(),
    )
    .with_surcharge(HeavySurcharge::flat());

    let mut raw = submission(pool_id, "jane@example.com");
    raw.quote.weight_lb = Some(200.0);
    pipeline.submit(&raw, CLIENT).await.unwrap();

    let pledge = &store.recorded()[0];
    assert_eq!(pledge.quote.surcharge, 50.0);
    assert_eq!(
        pledge.quote.total,
        pledge.quote.shipping_cost + pledge.quote.pickup_fee + 50.0
    );

    // Without a declared weight the rule stays dormant.
    let mut raw = submission(pool_id, "june@example.com");
    raw.quote.weight_lb = None;
    pipeline.submit(&raw, CLIENT).await.unwrap();
    assert_eq!(store.recorded()[1].quote.surcharge, 0.0);
}

#[tokio::test]
async fn admin_updates_follow_the_status_lifecycle() {
    let h = harness(PoolStatus::Collecting);
    let id = h
        .pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await
        .unwrap();
    let store: &FakeStore = &h.store;

    // Pledged -> Shipped skips confirmation; refused.
    let skip = admin_update(
        store,
        id,
        &AdminPledgeUpdate {
            status: Some(PledgeStatus::Shipped),
            is_internal_cargo: None,
        },
    )
    .await;
    assert!(matches!(
        skip,
        Err(AdminUpdateError::InvalidTransition {
            from: PledgeStatus::Pledged,
            to: PledgeStatus::Shipped,
        })
    ));

    // Pledged -> Confirmed -> Shipped walks the lifecycle.
    admin_update(
        store,
        id,
        &AdminPledgeUpdate {
            status: Some(PledgeStatus::Confirmed),
            is_internal_cargo: Some(true),
        },
    )
    .await
    .unwrap();
    admin_update(
        store,
        id,
        &AdminPledgeUpdate {
            status: Some(PledgeStatus::Shipped),
            is_internal_cargo: None,
        },
    )
    .await
    .unwrap();

    let pledge = &h.store.recorded()[0];
    assert_eq!(pledge.status, PledgeStatus::Shipped);
    assert!(pledge.is_internal_cargo);

    // Empty updates and unknown pledges are refused.
    assert!(matches!(
        admin_update(store, id, &AdminPledgeUpdate::default()).await,
        Err(AdminUpdateError::EmptyUpdate)
    ));
    assert!(matches!(
        admin_update(
            store,
            PledgeId::generate(),
            &AdminPledgeUpdate {
                status: Some(PledgeStatus::Confirmed),
                is_internal_cargo: None,
            },
        )
        .await,
        Err(AdminUpdateError::NotFound)
    ));
}

#[tokio::test]
async fn withdrawn_pledge_frees_the_email_for_a_new_pledge() {
    let h = harness(PoolStatus::Collecting);
    let id = h
        .pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await
        .unwrap();

    let store: &FakeStore = &h.store;
    admin_update(
        store,
        id,
        &AdminPledgeUpdate {
            status: Some(PledgeStatus::Withdrawn),
            is_internal_cargo: None,
        },
    )
    .await
    .unwrap();

    // The withdrawn pledge no longer blocks the email.
    h.pipeline
        .submit(&submission(h.pool_id, "jane@example.com"), CLIENT)
        .await
        .unwrap();
    assert_eq!(h.store.recorded().len(), 2);
}
