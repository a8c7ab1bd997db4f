//! Claim generation
//!
//! Turns a satisfied trigger into a payout claim: computes the fixed and
//! over-threshold payout components, clamps by cap and coverage, builds the
//! evidence summary and persists the claim exactly once per 24 h window.

use crate::domain::{
    generate_claim_number, BasePolicy, Claim, ClaimId, ClaimStatus, PolicyStatus,
    RegisteredPolicy, TriggerId,
};
use crate::error::EngineResult;
use crate::evaluator::TriggeredCondition;
use crate::notify::{BestEffortNotifier, NotificationEvent};
use crate::store::Stores;
use std::time::Duration;

/// Generates and persists claims from triggered conditions
pub struct ClaimGenerator {
    stores: Stores,
    notifier: BestEffortNotifier,
    /// Duplicate-suppression lookback for (policy, trigger)
    dedup_window: Duration,
    /// Time until a generated claim auto-approves without partner review
    auto_approval_window: Duration,
}

impl ClaimGenerator {
    pub fn new(
        stores: Stores,
        notifier: BestEffortNotifier,
        dedup_window: Duration,
        auto_approval_window: Duration,
    ) -> Self {
        Self {
            stores,
            notifier,
            dedup_window,
            auto_approval_window,
        }
    }

    /// Generate a claim for a satisfied trigger
    ///
    /// Idempotent over the dedup window: an existing claim for the same
    /// (policy, trigger) is returned unchanged. The duplicate check is
    /// lookup-then-create; a concurrent double-create is tolerated and
    /// logged as suspect rather than prevented.
    pub async fn generate(
        &self,
        policy: &RegisteredPolicy,
        base_policy: &BasePolicy,
        trigger_id: TriggerId,
        triggered: &[TriggeredCondition],
        now: i64,
    ) -> EngineResult<Claim> {
        let dedup_since = now - self.dedup_window.as_secs() as i64;
        if let Some(existing) = self
            .stores
            .claims
            .recent_for_trigger(policy.id, trigger_id, dedup_since)
            .await?
        {
            tracing::info!(
                claim_number = %existing.claim_number,
                policy_number = %policy.policy_number,
                "duplicate trigger within the dedup window, returning existing claim"
            );
            return Ok(existing);
        }

        let fix_payout = base_policy.fix_payout_amount * base_policy.payout_base_rate;

        let max_overshoot = triggered
            .iter()
            .filter(|t| !t.is_early_warning)
            .map(|t| t.operator.overshoot(t.measured_value, t.threshold_value))
            .fold(0.0_f64, f64::max);
        let threshold_payout = if max_overshoot > 0.0 {
            max_overshoot * base_policy.over_threshold_multiplier
        } else {
            0.0
        };

        let mut total = fix_payout + threshold_payout;
        if let Some(cap) = base_policy.payout_cap {
            total = total.min(cap);
        }
        total = total.min(policy.coverage_amount);

        let trigger_timestamp = triggered
            .iter()
            .map(|t| t.timestamp)
            .max()
            .unwrap_or(now);

        let claim = Claim {
            id: ClaimId::new(),
            claim_number: generate_claim_number(),
            registered_policy_id: policy.id,
            base_policy_id: base_policy.id,
            farm_id: policy.farm_id,
            trigger_id,
            trigger_timestamp,
            calculated_fix_payout: fix_payout,
            threshold_payout,
            total_amount: total,
            over_threshold_value: max_overshoot.max(0.0),
            auto_approval_deadline: now + self.auto_approval_window.as_secs() as i64,
            evidence_summary: Self::evidence_summary(triggered, trigger_timestamp),
            status: ClaimStatus::Generated,
            auto_generated: true,
            created_at: now,
        };

        self.stores.claims.insert_claim(&claim).await?;
        tracing::info!(
            claim_number = %claim.claim_number,
            policy_number = %policy.policy_number,
            total = claim.total_amount,
            "claim generated"
        );

        // A qualifying claim moves the policy to Payout
        if let Some(mut fresh) = self.stores.policies.get_policy(policy.id).await? {
            if fresh.status == PolicyStatus::Active {
                fresh.enter_payout()?;
                self.stores.policies.update_policy(&fresh).await?;
            }
        }

        self.notifier.send(NotificationEvent::ClaimGenerated {
            farmer_id: policy.farmer_id,
            policy_id: policy.id,
            claim_id: claim.id,
            total_amount: claim.total_amount,
        });

        Ok(claim)
    }

    fn evidence_summary(triggered: &[TriggeredCondition], triggered_at: i64) -> serde_json::Value {
        let conditions: Vec<serde_json::Value> = triggered
            .iter()
            .map(|t| {
                serde_json::json!({
                    "condition_id": t.condition_id,
                    "parameter_name": t.parameter_name,
                    "measured_value": t.measured_value,
                    "threshold_value": t.threshold_value,
                    "operator": t.operator,
                    "timestamp": t.timestamp,
                    "baseline_value": t.baseline_value,
                    "consecutive_days": t.consecutive_days,
                    "is_early_warning": t.is_early_warning,
                    "early_warning_threshold": t.early_warning_threshold,
                })
            })
            .collect();

        serde_json::json!({
            "triggered_at": triggered_at,
            "conditions_count": triggered.iter().filter(|t| !t.is_early_warning).count(),
            "generation_method": "automatic",
            "conditions": conditions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        generate_policy_number, BasePolicyId, BasePolicyStatus, ConditionId,
        DocumentValidationStatus, FarmId, FarmerId, ProviderId, RegisteredPolicyId,
        ThresholdOperator, UnderwritingStatus, ValidityWindow,
    };
    use crate::notify::NoopNotifier;
    use std::sync::Arc;
    use std::time::Duration;

    fn base_policy() -> BasePolicy {
        BasePolicy {
            id: BasePolicyId::new(),
            provider_id: ProviderId::new(),
            product_name: "Drought Shield".to_string(),
            crop_type: "maize".to_string(),
            currency: "USD".to_string(),
            coverage_duration_days: 120,
            fix_premium_amount: 50.0,
            premium_base_rate: 0.05,
            fix_payout_amount: 500.0,
            payout_base_rate: 1.0,
            over_threshold_multiplier: 100.0,
            payout_cap: Some(5_000.0),
            per_hectare: false,
            enrollment_start_day: 1,
            enrollment_end_day: 30,
            validity: ValidityWindow {
                from_day: 1,
                to_day: 120,
            },
            document_tags: Default::default(),
            auto_renewal: false,
            renewal_discount_rate: 0.0,
            status: BasePolicyStatus::Active,
            document_validation: DocumentValidationStatus::Passed,
        }
    }

    fn active_policy(base: &BasePolicy) -> RegisteredPolicy {
        RegisteredPolicy {
            id: RegisteredPolicyId::new(),
            base_policy_id: base.id,
            farm_id: FarmId::new(),
            farmer_id: FarmerId::new(),
            provider_id: base.provider_id,
            policy_number: generate_policy_number(),
            coverage_start: 1_690_000_000,
            coverage_end: 1_700_000_000,
            total_farmer_premium: 1_000.0,
            total_data_cost: 100.0,
            coverage_amount: 10_000.0,
            underwriting_status: UnderwritingStatus::Approved,
            status: PolicyStatus::Active,
            signed_document_url: None,
            premium_paid_at: Some(1_690_000_000),
            created_at: 1_689_000_000,
        }
    }

    fn triggered(measured: f64, threshold: f64, early: bool) -> TriggeredCondition {
        TriggeredCondition {
            condition_id: ConditionId::new(),
            parameter_name: "RainFall".to_string(),
            measured_value: measured,
            threshold_value: threshold,
            operator: ThresholdOperator::Lt,
            timestamp: 1_695_000_000,
            baseline_value: None,
            consecutive_days: 5,
            is_early_warning: early,
            early_warning_threshold: None,
        }
    }

    fn generator(stores: &Stores) -> ClaimGenerator {
        ClaimGenerator::new(
            stores.clone(),
            BestEffortNotifier::new(Arc::new(NoopNotifier), 1, Duration::from_millis(1)),
            Duration::from_secs(24 * 3600),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    #[tokio::test]
    async fn test_payout_arithmetic() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);

        let claim = gen
            .generate(
                &policy,
                &base,
                TriggerId::new(),
                &[triggered(0.3, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();

        assert_eq!(claim.calculated_fix_payout, 500.0);
        assert!((claim.over_threshold_value - 0.7).abs() < 1e-9);
        assert!((claim.threshold_payout - 70.0).abs() < 1e-9);
        assert_eq!(claim.total_amount, 570.0);
        assert_eq!(claim.status, ClaimStatus::Generated);
        assert!(claim.auto_generated);
        assert_eq!(
            claim.auto_approval_deadline,
            1_695_000_000 + 7 * 24 * 3600
        );
        assert!(claim.claim_number.starts_with("CLM"));

        // Policy moved to Payout
        let fresh = stores.policies.get_policy(policy.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, PolicyStatus::Payout);
    }

    #[tokio::test]
    async fn test_total_clamped_by_cap_then_coverage() {
        let stores = Stores::in_memory();
        let mut base = base_policy();
        base.payout_cap = Some(550.0);
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);

        let claim = gen
            .generate(
                &policy,
                &base,
                TriggerId::new(),
                &[triggered(0.0, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();
        assert_eq!(claim.total_amount, 550.0);

        // Coverage amount clamps below the cap
        let mut base2 = base_policy();
        base2.payout_cap = None;
        let mut policy2 = active_policy(&base2);
        policy2.coverage_amount = 520.0;
        stores.policies.insert_policy(&policy2).await.unwrap();
        let claim2 = gen
            .generate(
                &policy2,
                &base2,
                TriggerId::new(),
                &[triggered(0.0, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();
        assert_eq!(claim2.total_amount, 520.0);
    }

    #[tokio::test]
    async fn test_early_warning_excluded_from_overshoot() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);

        let claim = gen
            .generate(
                &policy,
                &base,
                TriggerId::new(),
                &[triggered(0.5, 1.0, false), triggered(0.0, 1.0, true)],
                1_695_000_000,
            )
            .await
            .unwrap();

        // The early-warning overshoot of 1.0 must not win over 0.5
        assert!((claim.over_threshold_value - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_duplicate_within_window_returns_existing() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);
        let trigger_id = TriggerId::new();

        let first = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();
        let second = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.1, 1.0, false)],
                1_695_000_010,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.claim_number, second.claim_number);
    }

    #[tokio::test]
    async fn test_configured_windows_are_honored() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = ClaimGenerator::new(
            stores.clone(),
            BestEffortNotifier::new(Arc::new(NoopNotifier), 1, Duration::from_millis(1)),
            Duration::from_secs(3600),
            Duration::from_secs(2 * 24 * 3600),
        );
        let trigger_id = TriggerId::new();

        let first = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();
        assert_eq!(
            first.auto_approval_deadline,
            1_695_000_000 + 2 * 24 * 3600
        );

        // Inside the 1 h window the first claim comes back
        let duplicate = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000 + 1800,
            )
            .await
            .unwrap();
        assert_eq!(duplicate.id, first.id);

        // Past it a fresh claim is generated
        let fresh = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000 + 2 * 3600,
            )
            .await
            .unwrap();
        assert_ne!(fresh.id, first.id);
    }

    #[tokio::test]
    async fn test_claim_allowed_after_window_elapses() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);
        let trigger_id = TriggerId::new();

        let first = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000,
            )
            .await
            .unwrap();
        let second = gen
            .generate(
                &policy,
                &base,
                trigger_id,
                &[triggered(0.3, 1.0, false)],
                1_695_000_000 + 25 * 3600,
            )
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_evidence_summary_shape() {
        let stores = Stores::in_memory();
        let base = base_policy();
        let policy = active_policy(&base);
        stores.policies.insert_policy(&policy).await.unwrap();
        let gen = generator(&stores);

        let claim = gen
            .generate(
                &policy,
                &base,
                TriggerId::new(),
                &[triggered(0.3, 1.0, false), triggered(0.9, 1.0, true)],
                1_695_000_000,
            )
            .await
            .unwrap();

        let evidence = &claim.evidence_summary;
        assert_eq!(evidence["generation_method"], "automatic");
        assert_eq!(evidence["conditions_count"], 1);
        assert_eq!(evidence["conditions"].as_array().unwrap().len(), 2);
    }
}
