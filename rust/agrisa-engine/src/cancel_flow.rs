//! Cancel request and dispute workflow
//!
//! Pre-active policies cancel immediately; active policies go through
//! review, an optional dispute round, and a notice period signaled
//! through the cache before cancellation finalizes.

use crate::cache::TtlCache;
use crate::domain::{
    CancelRequest, CancelRequestId, CancelRequestStatus, CancelRequestType, Party,
    PolicyStatus, ProviderId, RegisteredPolicy, RegisteredPolicyId,
};
use crate::error::{EngineError, EngineResult};
use crate::expiration::ExpiredKey;
use crate::notify::{BestEffortNotifier, NotificationEvent};
use crate::store::Stores;
use crate::workers::WorkerManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Minimum request age before review, except for transfer contracts
const REVIEW_GRACE_SECONDS: i64 = 60;

/// Cancel and dispute workflow service
pub struct CancelWorkflow {
    stores: Stores,
    cache: Arc<TtlCache>,
    workers: Arc<WorkerManager>,
    notifier: BestEffortNotifier,
    /// Grace window between approval and final cancellation
    notice_period: Duration,
}

impl CancelWorkflow {
    pub fn new(
        stores: Stores,
        cache: Arc<TtlCache>,
        workers: Arc<WorkerManager>,
        notifier: BestEffortNotifier,
        notice_period: Duration,
    ) -> Self {
        Self {
            stores,
            cache,
            workers,
            notifier,
            notice_period,
        }
    }

    /// Raise a cancel request against a policy
    ///
    /// Only the policy's farmer or provider may request, and only while
    /// the policy is in PendingReview, PendingPayment or Active. A policy
    /// that has not activated yet cancels on the spot.
    pub async fn create(
        &self,
        policy_id: RegisteredPolicyId,
        requested_by: Party,
        kind: CancelRequestType,
    ) -> EngineResult<CancelRequest> {
        let mut policy = self.load_policy(policy_id).await?;
        self.ensure_party_of(&policy, &requested_by)?;

        if !matches!(
            policy.status,
            PolicyStatus::PendingReview | PolicyStatus::PendingPayment | PolicyStatus::Active
        ) {
            return Err(EngineError::StateTransition {
                from: policy.status.to_string(),
                to: "PendingCancel".to_string(),
            });
        }

        if kind != CancelRequestType::TransferContract
            && self
                .stores
                .claims
                .has_pending_partner_review(policy_id)
                .await?
        {
            return Err(EngineError::Validation(
                "policy has a claim pending partner review".to_string(),
            ));
        }

        let base_policy = self
            .stores
            .base_policies
            .get_base_policy(policy.base_policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("BasePolicy", policy.base_policy_id))?;
        let now = Utc::now().timestamp();
        let compensation = self
            .stores
            .cancels
            .compensation_amount(&policy, &base_policy, &requested_by, kind, now)
            .await?;

        let mut request = CancelRequest {
            id: CancelRequestId::new(),
            policy_id,
            request_type: kind,
            status: CancelRequestStatus::PendingReview,
            compensation_amount: compensation,
            during_notice_period: false,
            requested_by,
            reviewed_by: None,
            transfer_to: None,
            created_at: now,
            reviewed_at: None,
        };

        if policy.status != PolicyStatus::Active {
            // Pre-active policies cancel immediately
            policy.cancel()?;
            self.stores.policies.update_policy(&policy).await?;
            self.workers.cleanup(policy_id).await?;
            request.status = CancelRequestStatus::Approved;
            self.notifier.send(NotificationEvent::PolicyCancelled {
                farmer_id: policy.farmer_id,
                policy_id,
                reason: "cancelled before activation".to_string(),
            });
        } else if kind != CancelRequestType::TransferContract {
            policy.enter_pending_cancel()?;
            self.stores.policies.update_policy(&policy).await?;
        }

        self.stores.cancels.insert_request(&request).await?;
        tracing::info!(
            request_id = %request.id,
            policy_number = %policy.policy_number,
            kind = ?kind,
            "cancel request created"
        );
        Ok(request)
    }

    /// Provider-initiated bulk transfer across its active policies
    pub async fn create_transfer_requests(
        &self,
        provider_id: ProviderId,
        transfer_to: ProviderId,
    ) -> EngineResult<Vec<CancelRequest>> {
        let active = self.stores.policies.list_active().await?;
        let mut requests = Vec::new();
        for policy in active.into_iter().filter(|p| p.provider_id == provider_id) {
            let mut request = self
                .create(
                    policy.id,
                    Party::Provider(provider_id),
                    CancelRequestType::TransferContract,
                )
                .await?;
            request.transfer_to = Some(transfer_to);
            self.stores.cancels.update_request(&request).await?;
            requests.push(request);
        }
        Ok(requests)
    }

    /// Review a pending request
    ///
    /// The reviewer must differ from the requester and the request must be
    /// older than the grace window (transfer contracts skip the grace).
    /// Approval starts the notice period; denial sends the policy to
    /// Dispute and the request to Litigation.
    pub async fn review(
        &self,
        request_id: CancelRequestId,
        reviewer: Party,
        approve: bool,
    ) -> EngineResult<CancelRequest> {
        let mut request = self.load_request(request_id).await?;
        if request.status != CancelRequestStatus::PendingReview {
            return Err(EngineError::StateTransition {
                from: format!("{:?}", request.status),
                to: "Reviewed".to_string(),
            });
        }
        if reviewer == request.requested_by {
            return Err(EngineError::Validation(
                "requester cannot review their own request".to_string(),
            ));
        }
        let now = Utc::now().timestamp();
        if request.request_type != CancelRequestType::TransferContract
            && request.age_seconds(now) <= REVIEW_GRACE_SECONDS
        {
            return Err(EngineError::Validation(format!(
                "request {} is still inside the review grace window",
                request.id
            )));
        }

        let mut policy = self.load_policy(request.policy_id).await?;
        request.reviewed_by = Some(reviewer);
        request.reviewed_at = Some(now);

        if request.request_type == CancelRequestType::TransferContract {
            if approve {
                let transfer_to = request.transfer_to.ok_or_else(|| {
                    EngineError::Validation(
                        "transfer request has no receiving provider".to_string(),
                    )
                })?;
                policy.provider_id = transfer_to;
                self.stores.policies.update_policy(&policy).await?;
                request.status = CancelRequestStatus::Approved;
            } else {
                // A refused transfer falls back to an ordinary cancel
                request.status = CancelRequestStatus::Denied;
                self.stores.cancels.update_request(&request).await?;
                let fallback = self
                    .create(
                        request.policy_id,
                        request.requested_by,
                        CancelRequestType::Other,
                    )
                    .await?;
                tracing::info!(
                    request_id = %request.id,
                    fallback_id = %fallback.id,
                    "transfer denied, regular cancel request created"
                );
                return Ok(request);
            }
        } else if approve {
            request.status = CancelRequestStatus::Approved;
            self.begin_notice_period(&mut request);
        } else {
            request.status = CancelRequestStatus::Litigation;
            policy.enter_dispute()?;
            self.stores.policies.update_policy(&policy).await?;
        }

        self.stores.cancels.update_request(&request).await?;
        self.notifier.send(NotificationEvent::CancelReviewed {
            policy_id: request.policy_id,
            request_id: request.id,
            approved: approve,
        });
        Ok(request)
    }

    /// Resolve a litigated request; only the prior reviewer may rule
    pub async fn resolve_conflict(
        &self,
        request_id: CancelRequestId,
        resolver: Party,
        final_approved: bool,
    ) -> EngineResult<CancelRequest> {
        let mut request = self.load_request(request_id).await?;
        if request.status != CancelRequestStatus::Litigation {
            return Err(EngineError::StateTransition {
                from: format!("{:?}", request.status),
                to: "Resolved".to_string(),
            });
        }
        if request.reviewed_by != Some(resolver) {
            return Err(EngineError::Validation(
                "only the prior reviewer may resolve the conflict".to_string(),
            ));
        }

        let mut policy = self.load_policy(request.policy_id).await?;
        if final_approved {
            request.status = CancelRequestStatus::Approved;
            policy.enter_pending_cancel()?;
            self.stores.policies.update_policy(&policy).await?;
            self.begin_notice_period(&mut request);
        } else {
            request.status = CancelRequestStatus::Denied;
            policy.reactivate()?;
            self.stores.policies.update_policy(&policy).await?;
        }
        self.stores.cancels.update_request(&request).await?;
        Ok(request)
    }

    /// Revoke a request; only its requester may, and only before the
    /// notice period started or payment failed
    pub async fn revoke(
        &self,
        request_id: CancelRequestId,
        by: Party,
    ) -> EngineResult<CancelRequest> {
        let mut request = self.load_request(request_id).await?;
        if by != request.requested_by {
            return Err(EngineError::Validation(
                "only the requester may revoke".to_string(),
            ));
        }
        if matches!(
            request.status,
            CancelRequestStatus::Approved | CancelRequestStatus::PaymentFailed
        ) {
            return Err(EngineError::StateTransition {
                from: format!("{:?}", request.status),
                to: "Cancelled".to_string(),
            });
        }

        request.status = CancelRequestStatus::Cancelled;
        self.stores.cancels.update_request(&request).await?;

        let mut policy = self.load_policy(request.policy_id).await?;
        if policy.status == PolicyStatus::PendingCancel {
            policy.reactivate()?;
            self.stores.policies.update_policy(&policy).await?;
        }
        tracing::info!(request_id = %request.id, "cancel request revoked");
        Ok(request)
    }

    /// Notice-period expiry finalizes an approved cancellation
    ///
    /// Idempotent on re-delivery: anything but an Approved request over a
    /// PendingCancel policy is a no-op.
    pub async fn finalize_notice_period(
        &self,
        request_id: CancelRequestId,
    ) -> EngineResult<()> {
        let request = self.load_request(request_id).await?;
        if request.status != CancelRequestStatus::Approved {
            return Ok(());
        }
        let mut policy = self.load_policy(request.policy_id).await?;
        if policy.status != PolicyStatus::PendingCancel {
            return Ok(());
        }

        policy.cancel()?;
        self.stores.policies.update_policy(&policy).await?;
        self.workers.cleanup(policy.id).await?;
        self.notifier.send(NotificationEvent::PolicyCancelled {
            farmer_id: policy.farmer_id,
            policy_id: policy.id,
            reason: "cancel request approved, notice period elapsed".to_string(),
        });
        tracing::info!(
            request_id = %request.id,
            policy_number = %policy.policy_number,
            "cancellation finalized after notice period"
        );
        Ok(())
    }

    fn begin_notice_period(&self, request: &mut CancelRequest) {
        request.during_notice_period = true;
        let key = ExpiredKey::CancelNoticePeriod {
            request_id: request.id,
        }
        .format();
        self.cache.set_with_ttl(key, "1", self.notice_period);
    }

    fn ensure_party_of(
        &self,
        policy: &RegisteredPolicy,
        party: &Party,
    ) -> EngineResult<()> {
        let allowed = match party {
            Party::Farmer(farmer_id) => *farmer_id == policy.farmer_id,
            Party::Provider(provider_id) => *provider_id == policy.provider_id,
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "party is neither the farmer nor the provider of policy {}",
                policy.policy_number
            )))
        }
    }

    async fn load_policy(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<RegisteredPolicy> {
        self.stores
            .policies
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("RegisteredPolicy", policy_id))
    }

    async fn load_request(
        &self,
        request_id: CancelRequestId,
    ) -> EngineResult<CancelRequest> {
        self.stores
            .cancels
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CancelRequest", request_id))
    }
}
