//! Policy lifecycle choreography
//!
//! The transition methods on `RegisteredPolicy` are the only way status
//! changes; this service wraps them with persistence, worker lifecycle,
//! payment-window signaling and notifications.

use crate::cache::TtlCache;
use crate::domain::{
    generate_policy_number, BasePolicyId, FarmId, FarmerId, PolicyStatus, RegisteredPolicy,
    RegisteredPolicyId, UnderwritingStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::expiration::ExpiredKey;
use crate::notify::{BestEffortNotifier, NotificationEvent};
use crate::store::Stores;
use crate::workers::WorkerManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Inputs for registering a policy
#[derive(Debug, Clone)]
pub struct Registration {
    pub base_policy_id: BasePolicyId,
    pub farm_id: FarmId,
    pub farmer_id: FarmerId,
    pub total_farmer_premium: f64,
    pub total_data_cost: f64,
    pub coverage_amount: f64,
    pub signed_document_url: Option<String>,
}

/// Drives registered policies through their state machine
pub struct PolicyLifecycle {
    stores: Stores,
    workers: Arc<WorkerManager>,
    cache: Arc<TtlCache>,
    notifier: BestEffortNotifier,
    /// Window a farmer has to pay premium after underwriting approval
    payment_window: Duration,
}

impl PolicyLifecycle {
    pub fn new(
        stores: Stores,
        workers: Arc<WorkerManager>,
        cache: Arc<TtlCache>,
        notifier: BestEffortNotifier,
        payment_window: Duration,
    ) -> Self {
        Self {
            stores,
            workers,
            cache,
            notifier,
            payment_window,
        }
    }

    /// Register a policy against an active base policy
    ///
    /// The policy starts in PendingReview with coverage_start 0; its
    /// monitoring worker is built and started immediately so data
    /// collection begins before payment.
    pub async fn register(&self, registration: Registration) -> EngineResult<RegisteredPolicy> {
        let base_policy = self
            .stores
            .base_policies
            .get_base_policy(registration.base_policy_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found("BasePolicy", registration.base_policy_id)
            })?;
        if base_policy.status != crate::domain::BasePolicyStatus::Active {
            return Err(EngineError::Validation(format!(
                "base policy {} is not open for enrollment",
                base_policy.id
            )));
        }
        self.stores
            .farms
            .get_farm(registration.farm_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Farm", registration.farm_id))?;

        let policy = RegisteredPolicy {
            id: RegisteredPolicyId::new(),
            base_policy_id: base_policy.id,
            farm_id: registration.farm_id,
            farmer_id: registration.farmer_id,
            provider_id: base_policy.provider_id,
            policy_number: generate_policy_number(),
            coverage_start: 0,
            coverage_end: i64::from(base_policy.validity.to_day),
            total_farmer_premium: registration.total_farmer_premium,
            total_data_cost: registration.total_data_cost,
            coverage_amount: registration.coverage_amount,
            underwriting_status: UnderwritingStatus::Pending,
            status: PolicyStatus::PendingReview,
            signed_document_url: registration.signed_document_url,
            premium_paid_at: None,
            created_at: Utc::now().timestamp(),
        };
        self.stores.policies.insert_policy(&policy).await?;

        if let Some(trigger) = self
            .stores
            .base_policies
            .trigger_for(base_policy.id)
            .await?
        {
            self.workers.create(&policy, &trigger).await?;
            self.workers.start(policy.id).await?;
        } else {
            tracing::warn!(
                policy_number = %policy.policy_number,
                "registered without monitoring: base policy has no trigger"
            );
        }

        tracing::info!(policy_number = %policy.policy_number, "policy registered");
        Ok(policy)
    }

    /// Underwriting approval opens the payment window
    pub async fn approve_underwriting(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<RegisteredPolicy> {
        let mut policy = self.load(policy_id).await?;
        policy.approve()?;
        self.stores.policies.update_policy(&policy).await?;

        let key = ExpiredKey::PaymentWindow { policy_id }.format();
        self.cache.set_with_ttl(key, "1", self.payment_window);
        tracing::info!(policy_number = %policy.policy_number, "underwriting approved");
        Ok(policy)
    }

    /// Underwriting rejection is terminal
    pub async fn reject_underwriting(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<RegisteredPolicy> {
        let mut policy = self.load(policy_id).await?;
        policy.reject()?;
        self.stores.policies.update_policy(&policy).await?;
        self.workers.cleanup(policy_id).await?;
        tracing::info!(policy_number = %policy.policy_number, "underwriting rejected");
        Ok(policy)
    }

    /// Premium payment activates coverage and (re)builds the worker
    pub async fn record_payment(
        &self,
        policy_id: RegisteredPolicyId,
        paid_at: i64,
    ) -> EngineResult<RegisteredPolicy> {
        let mut policy = self.load(policy_id).await?;
        policy.record_payment(paid_at)?;
        self.stores.policies.update_policy(&policy).await?;
        self.cache
            .del(&ExpiredKey::PaymentWindow { policy_id }.format());

        if let Some(trigger) = self
            .stores
            .base_policies
            .trigger_for(policy.base_policy_id)
            .await?
        {
            self.workers.create(&policy, &trigger).await?;
            self.workers.start(policy.id).await?;
        }

        tracing::info!(
            policy_number = %policy.policy_number,
            paid_at,
            "premium paid, coverage active"
        );
        Ok(policy)
    }

    /// Payment-window expiry cancels policies still awaiting payment
    ///
    /// Idempotent: policies that paid in time, or that already moved on,
    /// are left untouched.
    pub async fn handle_payment_window_expired(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<()> {
        let mut policy = self.load(policy_id).await?;
        if policy.status != PolicyStatus::PendingPayment {
            tracing::debug!(
                policy_number = %policy.policy_number,
                status = %policy.status,
                "payment window expired but policy moved on"
            );
            return Ok(());
        }
        policy.cancel()?;
        self.stores.policies.update_policy(&policy).await?;
        self.workers.cleanup(policy_id).await?;
        self.notifier.send(NotificationEvent::PolicyCancelled {
            farmer_id: policy.farmer_id,
            policy_id: policy.id,
            reason: "premium not paid within the payment window".to_string(),
        });
        tracing::info!(
            policy_number = %policy.policy_number,
            "policy cancelled: payment window elapsed"
        );
        Ok(())
    }

    async fn load(&self, policy_id: RegisteredPolicyId) -> EngineResult<RegisteredPolicy> {
        self.stores
            .policies
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("RegisteredPolicy", policy_id))
    }
}
