//! Renewal orchestration: discounted re-billing, archival without
//! auto-renewal, and re-delivery idempotence

mod common;

use agrisa_engine::domain::*;
use agrisa_engine::renewal::RenewalOutcome;
use agrisa_engine::{Engine, EngineOptions, Stores};
use common::*;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    engine: Engine,
    stores: Stores,
    notifier: Arc<RecordingNotifier>,
}

async fn fixture() -> Fixture {
    let stores = Stores::in_memory();
    let notifier = RecordingNotifier::new();
    let options = EngineOptions {
        notifier: notifier.clone(),
        notify_retry_spacing: Duration::from_millis(5),
        ..EngineOptions::default()
    };
    let engine = Engine::build(stores.clone(), options).unwrap();
    Fixture {
        engine,
        stores,
        notifier,
    }
}

#[tokio::test]
async fn test_renewal_advances_window_and_rebills_with_discount() {
    let fx = fixture().await;
    let base = base_policy(true, 10.0);
    let farm = farm();
    let policy = registered_policy(&base, &farm, PolicyStatus::Active);

    fx.stores.base_policies.insert_base_policy(&base).await.unwrap();
    fx.stores.farms.insert_farm(&farm).await.unwrap();
    fx.stores.policies.insert_policy(&policy).await.unwrap();

    let outcome = fx.engine.renewal.prepare_renewal(base.id).await.unwrap();
    assert_eq!(
        outcome,
        RenewalOutcome::Renewed {
            rebilled: 1,
            expired: 0
        }
    );

    let renewed_base = fx
        .stores
        .base_policies
        .get_base_policy(base.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renewed_base.validity.from_day, 121);
    assert_eq!(renewed_base.validity.to_day, 240);
    assert_eq!(renewed_base.validity.duration_days(), 120);

    let rebilled = fx
        .stores
        .policies
        .get_policy(policy.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebilled.status, PolicyStatus::PendingPayment);
    assert_eq!(rebilled.total_farmer_premium, 900.0);
    assert_eq!(rebilled.coverage_end, 240);
    assert!(rebilled.premium_paid_at.is_none());
}

#[tokio::test]
async fn test_renewal_is_idempotent_within_dedup_window() {
    let fx = fixture().await;
    let base = base_policy(true, 10.0);
    let farm = farm();
    let policy = registered_policy(&base, &farm, PolicyStatus::Active);

    fx.stores.base_policies.insert_base_policy(&base).await.unwrap();
    fx.stores.farms.insert_farm(&farm).await.unwrap();
    fx.stores.policies.insert_policy(&policy).await.unwrap();

    fx.engine.renewal.prepare_renewal(base.id).await.unwrap();
    let second = fx.engine.renewal.prepare_renewal(base.id).await.unwrap();
    assert_eq!(second, RenewalOutcome::AlreadyProcessed);

    // Same window, premium discounted exactly once
    let renewed_base = fx
        .stores
        .base_policies
        .get_base_policy(base.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renewed_base.validity.from_day, 121);
    assert_eq!(renewed_base.validity.to_day, 240);
    let rebilled = fx
        .stores
        .policies
        .get_policy(policy.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebilled.total_farmer_premium, 900.0);
    assert_eq!(rebilled.status, PolicyStatus::PendingPayment);
}

#[tokio::test]
async fn test_expiration_without_auto_renewal_archives_and_expires() {
    let fx = fixture().await;
    let base = base_policy(false, 0.0);
    let farm = farm();
    let active = registered_policy(&base, &farm, PolicyStatus::Active);
    let cancelled = registered_policy(&base, &farm, PolicyStatus::Cancelled);
    let rejected = registered_policy(&base, &farm, PolicyStatus::Rejected);

    fx.stores.base_policies.insert_base_policy(&base).await.unwrap();
    fx.stores.farms.insert_farm(&farm).await.unwrap();
    for p in [&active, &cancelled, &rejected] {
        fx.stores.policies.insert_policy(p).await.unwrap();
    }

    // Build the active policy's worker so teardown is observable
    let mut conditions = vec![drought_condition(DataSourceId::new())];
    let trigger = weather_trigger(&base, &mut conditions);
    fx.stores
        .base_policies
        .insert_trigger(&trigger, &conditions)
        .await
        .unwrap();
    fx.engine.workers.create(&active, &trigger).await.unwrap();
    assert_eq!(fx.engine.workers.worker_count(), 1);

    let outcome = fx.engine.renewal.prepare_renewal(base.id).await.unwrap();
    assert_eq!(outcome, RenewalOutcome::Expired { policies_expired: 1 });

    let archived = fx
        .stores
        .base_policies
        .get_base_policy(base.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.status, BasePolicyStatus::Archived);

    let expired = fx.stores.policies.get_policy(active.id).await.unwrap().unwrap();
    assert_eq!(expired.status, PolicyStatus::Expired);
    // Terminal policies untouched
    let still_cancelled = fx
        .stores
        .policies
        .get_policy(cancelled.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_cancelled.status, PolicyStatus::Cancelled);
    let still_rejected = fx
        .stores
        .policies
        .get_policy(rejected.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_rejected.status, PolicyStatus::Rejected);

    assert_eq!(fx.engine.workers.worker_count(), 0);

    // Archived products do not renew again
    let err = fx.engine.renewal.prepare_renewal(base.id).await;
    assert!(matches!(err, Ok(RenewalOutcome::AlreadyProcessed)) || err.is_err());
}

#[tokio::test]
async fn test_non_active_policies_expire_on_renewal() {
    let fx = fixture().await;
    let base = base_policy(true, 0.0);
    let farm = farm();
    let pending = registered_policy(&base, &farm, PolicyStatus::PendingPayment);
    let payout = registered_policy(&base, &farm, PolicyStatus::Payout);

    fx.stores.base_policies.insert_base_policy(&base).await.unwrap();
    fx.stores.farms.insert_farm(&farm).await.unwrap();
    fx.stores.policies.insert_policy(&pending).await.unwrap();
    fx.stores.policies.insert_policy(&payout).await.unwrap();

    let outcome = fx.engine.renewal.prepare_renewal(base.id).await.unwrap();
    assert_eq!(
        outcome,
        RenewalOutcome::Renewed {
            rebilled: 1,
            expired: 1
        }
    );

    let expired = fx.stores.policies.get_policy(pending.id).await.unwrap().unwrap();
    assert_eq!(expired.status, PolicyStatus::Expired);
    // Payout policies re-bill like active ones
    let rebilled = fx.stores.policies.get_policy(payout.id).await.unwrap().unwrap();
    assert_eq!(rebilled.status, PolicyStatus::PendingPayment);

    // Farmers heard about both outcomes
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fx.notifier.events.lock().len() >= 2);
}
