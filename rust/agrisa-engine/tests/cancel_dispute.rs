//! Cancel request and dispute workflow, including the notice period
//! finalized through the expiration bus

mod common;

use agrisa_engine::domain::*;
use agrisa_engine::{Engine, EngineOptions, EngineError, Stores};
use chrono::Utc;
use common::*;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    engine: Engine,
    stores: Stores,
    notifier: Arc<RecordingNotifier>,
    base: BasePolicy,
    farm: Farm,
}

async fn fixture(notice_period: Duration) -> Fixture {
    let stores = Stores::in_memory();
    let notifier = RecordingNotifier::new();
    let options = EngineOptions {
        notifier: notifier.clone(),
        notice_period,
        notify_retry_spacing: Duration::from_millis(5),
        ..EngineOptions::default()
    };
    let engine = Engine::build(stores.clone(), options).unwrap();

    let base = base_policy(true, 0.0);
    let farm = farm();
    stores.base_policies.insert_base_policy(&base).await.unwrap();
    stores.farms.insert_farm(&farm).await.unwrap();

    Fixture {
        engine,
        stores,
        notifier,
        base,
        farm,
    }
}

async fn insert_policy(fx: &Fixture, status: PolicyStatus) -> RegisteredPolicy {
    let policy = registered_policy(&fx.base, &fx.farm, status);
    fx.stores.policies.insert_policy(&policy).await.unwrap();
    policy
}

/// Age a request past the review grace window
async fn backdate(fx: &Fixture, request_id: CancelRequestId) {
    let mut request = fx
        .stores
        .cancels
        .get_request(request_id)
        .await
        .unwrap()
        .unwrap();
    request.created_at = Utc::now().timestamp() - 120;
    fx.stores.cancels.update_request(&request).await.unwrap();
}

#[tokio::test]
async fn test_pre_active_policy_cancels_immediately() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::PendingPayment).await;

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, Party::Farmer(policy.farmer_id), CancelRequestType::Other)
        .await
        .unwrap();

    assert_eq!(request.status, CancelRequestStatus::Approved);
    // Full refund before activation
    assert_eq!(request.compensation_amount, policy.total_farmer_premium);
    let cancelled = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, PolicyStatus::Cancelled);
}

#[tokio::test]
async fn test_stranger_cannot_cancel() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;

    let err = fx
        .engine
        .cancel_flow
        .create(
            policy.id,
            Party::Farmer(FarmerId::new()),
            CancelRequestType::Other,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_pending_partner_review_claim_blocks_cancel() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;

    let claim = Claim {
        id: ClaimId::new(),
        claim_number: generate_claim_number(),
        registered_policy_id: policy.id,
        base_policy_id: fx.base.id,
        farm_id: fx.farm.id,
        trigger_id: TriggerId::new(),
        trigger_timestamp: Utc::now().timestamp(),
        calculated_fix_payout: 500.0,
        threshold_payout: 0.0,
        total_amount: 500.0,
        over_threshold_value: 0.0,
        auto_approval_deadline: Utc::now().timestamp() + 7 * 86_400,
        evidence_summary: serde_json::json!({}),
        status: ClaimStatus::PendingPartnerReview,
        auto_generated: true,
        created_at: Utc::now().timestamp(),
    };
    fx.stores.claims.insert_claim(&claim).await.unwrap();

    let err = fx
        .engine
        .cancel_flow
        .create(policy.id, Party::Farmer(policy.farmer_id), CancelRequestType::Other)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_approved_cancel_finalizes_after_notice_period() {
    let fx = fixture(Duration::from_millis(200)).await;
    let bus_handle = fx.engine.start().await.unwrap();
    let policy = insert_policy(&fx, PolicyStatus::Active).await;

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, Party::Farmer(policy.farmer_id), CancelRequestType::Other)
        .await
        .unwrap();
    assert_eq!(request.status, CancelRequestStatus::PendingReview);
    let pending = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(pending.status, PolicyStatus::PendingCancel);

    // Review inside the grace window is refused
    let early = fx
        .engine
        .cancel_flow
        .review(request.id, Party::Provider(policy.provider_id), true)
        .await
        .unwrap_err();
    assert!(matches!(early, EngineError::Validation(_)));

    backdate(&fx, request.id).await;
    let reviewed = fx
        .engine
        .cancel_flow
        .review(request.id, Party::Provider(policy.provider_id), true)
        .await
        .unwrap();
    assert_eq!(reviewed.status, CancelRequestStatus::Approved);
    assert!(reviewed.during_notice_period);

    // Notice period elapses; the bus finalizes cancellation
    tokio::time::sleep(Duration::from_millis(800)).await;
    let cancelled = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, PolicyStatus::Cancelled);
    assert_eq!(fx.notifier.count_cancelled(), 1);
    bus_handle.abort();
}

#[tokio::test]
async fn test_requester_cannot_review_own_request() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, Party::Farmer(policy.farmer_id), CancelRequestType::Other)
        .await
        .unwrap();
    backdate(&fx, request.id).await;

    let err = fx
        .engine
        .cancel_flow
        .review(request.id, Party::Farmer(policy.farmer_id), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_denied_review_escalates_to_dispute() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;
    let reviewer = Party::Provider(policy.provider_id);

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, Party::Farmer(policy.farmer_id), CancelRequestType::Other)
        .await
        .unwrap();
    backdate(&fx, request.id).await;

    let denied = fx
        .engine
        .cancel_flow
        .review(request.id, reviewer, false)
        .await
        .unwrap();
    assert_eq!(denied.status, CancelRequestStatus::Litigation);
    let disputed = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(disputed.status, PolicyStatus::Dispute);

    // Only the prior reviewer may resolve
    let err = fx
        .engine
        .cancel_flow
        .resolve_conflict(request.id, Party::Farmer(policy.farmer_id), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Resolution in the farmer's favor reactivates the policy
    let resolved = fx
        .engine
        .cancel_flow
        .resolve_conflict(request.id, reviewer, false)
        .await
        .unwrap();
    assert_eq!(resolved.status, CancelRequestStatus::Denied);
    let active = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(active.status, PolicyStatus::Active);
}

#[tokio::test]
async fn test_revoke_returns_policy_to_active() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;
    let requester = Party::Farmer(policy.farmer_id);

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, requester, CancelRequestType::Other)
        .await
        .unwrap();

    // Only the requester may revoke
    let err = fx
        .engine
        .cancel_flow
        .revoke(request.id, Party::Provider(policy.provider_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let revoked = fx.engine.cancel_flow.revoke(request.id, requester).await.unwrap();
    assert_eq!(revoked.status, CancelRequestStatus::Cancelled);
    let active = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(active.status, PolicyStatus::Active);
}

#[tokio::test]
async fn test_revoke_refused_once_notice_period_started() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;
    let requester = Party::Farmer(policy.farmer_id);

    let request = fx
        .engine
        .cancel_flow
        .create(policy.id, requester, CancelRequestType::Other)
        .await
        .unwrap();
    backdate(&fx, request.id).await;
    fx.engine
        .cancel_flow
        .review(request.id, Party::Provider(policy.provider_id), true)
        .await
        .unwrap();

    let err = fx.engine.cancel_flow.revoke(request.id, requester).await.unwrap_err();
    assert!(matches!(err, EngineError::StateTransition { .. }));
}

#[tokio::test]
async fn test_transfer_contract_reassigns_provider() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;
    let new_provider = ProviderId::new();

    let requests = fx
        .engine
        .cancel_flow
        .create_transfer_requests(policy.provider_id, new_provider)
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.transfer_to, Some(new_provider));

    // The policy stays active while the transfer is pending
    let active = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(active.status, PolicyStatus::Active);

    // Transfer reviews skip the grace window
    let reviewed = fx
        .engine
        .cancel_flow
        .review(request.id, Party::Farmer(policy.farmer_id), true)
        .await
        .unwrap();
    assert_eq!(reviewed.status, CancelRequestStatus::Approved);

    let transferred = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(transferred.provider_id, new_provider);
    assert_eq!(transferred.status, PolicyStatus::Active);
}

#[tokio::test]
async fn test_denied_transfer_creates_fallback_cancel_request() {
    let fx = fixture(Duration::from_secs(3600)).await;
    let policy = insert_policy(&fx, PolicyStatus::Active).await;

    let requests = fx
        .engine
        .cancel_flow
        .create_transfer_requests(policy.provider_id, ProviderId::new())
        .await
        .unwrap();
    let request = &requests[0];

    let denied = fx
        .engine
        .cancel_flow
        .review(request.id, Party::Farmer(policy.farmer_id), false)
        .await
        .unwrap();
    assert_eq!(denied.status, CancelRequestStatus::Denied);

    // A regular cancel request took its place and the policy entered
    // the pending-cancel path
    let all = fx.stores.cancels.list_by_policy(policy.id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all
        .iter()
        .any(|r| r.request_type == CancelRequestType::Other
            && r.status == CancelRequestStatus::PendingReview));
    let pending = fx.stores.policies.get_policy(policy.id).await.unwrap().unwrap();
    assert_eq!(pending.status, PolicyStatus::PendingCancel);
}
