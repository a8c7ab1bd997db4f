//! Registered policy: a farmer and farm bound to a base policy

use crate::domain::ids::{BasePolicyId, FarmId, FarmerId, ProviderId, RegisteredPolicyId};
use crate::error::{EngineError, EngineResult};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Underwriting review outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnderwritingStatus {
    Pending,
    Approved,
    Rejected,
}

/// Registered policy lifecycle status
///
/// Transitions are the only way status changes; Cancelled and Rejected
/// are immutable terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    PendingReview,
    PendingPayment,
    Active,
    Payout,
    Cancelled,
    Rejected,
    Expired,
    PendingCancel,
    Dispute,
}

impl PolicyStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PolicyStatus::Cancelled | PolicyStatus::Rejected | PolicyStatus::Expired
        )
    }

    /// States during which worker infrastructure may exist
    pub fn monitoring_eligible(&self) -> bool {
        matches!(
            self,
            PolicyStatus::Active | PolicyStatus::PendingPayment | PolicyStatus::PendingReview
        )
    }
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Generate a policy number: "AGP" + 9 random alphanumerics
pub fn generate_policy_number() -> String {
    generate_numbered("AGP")
}

/// Generate a claim number: "CLM" + 9 random alphanumerics
pub fn generate_claim_number() -> String {
    generate_numbered("CLM")
}

fn generate_numbered(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Instance binding a farmer and farm to a base policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPolicy {
    pub id: RegisteredPolicyId,
    pub base_policy_id: BasePolicyId,
    pub farm_id: FarmId,
    pub farmer_id: FarmerId,
    pub provider_id: ProviderId,
    /// Unique "AGP" + 9 alphanumerics
    pub policy_number: String,
    /// Coverage start, unix seconds; 0 until premium is paid
    pub coverage_start: i64,
    /// Coverage end as the base policy's validity to_day ordinal;
    /// renewals advance it to the new window end
    pub coverage_end: i64,
    pub total_farmer_premium: f64,
    pub total_data_cost: f64,
    pub coverage_amount: f64,
    pub underwriting_status: UnderwritingStatus,
    pub status: PolicyStatus,
    pub signed_document_url: Option<String>,
    /// Premium payment time, unix seconds; cleared on renewal re-billing
    pub premium_paid_at: Option<i64>,
    pub created_at: i64,
}

impl RegisteredPolicy {
    fn transition(&mut self, allowed: &[PolicyStatus], to: PolicyStatus) -> EngineResult<()> {
        if allowed.contains(&self.status) {
            self.status = to;
            Ok(())
        } else {
            Err(EngineError::StateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Underwriting approval: PendingReview -> PendingPayment
    pub fn approve(&mut self) -> EngineResult<()> {
        self.underwriting_status = UnderwritingStatus::Approved;
        self.transition(&[PolicyStatus::PendingReview], PolicyStatus::PendingPayment)
    }

    /// Underwriting rejection: PendingReview -> Rejected
    pub fn reject(&mut self) -> EngineResult<()> {
        self.underwriting_status = UnderwritingStatus::Rejected;
        self.transition(&[PolicyStatus::PendingReview], PolicyStatus::Rejected)
    }

    /// Premium payment recorded: PendingPayment -> Active, coverage begins
    pub fn record_payment(&mut self, paid_at: i64) -> EngineResult<()> {
        self.transition(&[PolicyStatus::PendingPayment], PolicyStatus::Active)?;
        self.coverage_start = paid_at;
        self.premium_paid_at = Some(paid_at);
        Ok(())
    }

    /// Qualifying claim generated: Active -> Payout
    pub fn enter_payout(&mut self) -> EngineResult<()> {
        self.transition(&[PolicyStatus::Active], PolicyStatus::Payout)
    }

    /// Payment window elapsed unpaid, or pre-active cancel
    pub fn cancel(&mut self) -> EngineResult<()> {
        self.transition(
            &[
                PolicyStatus::PendingReview,
                PolicyStatus::PendingPayment,
                PolicyStatus::PendingCancel,
            ],
            PolicyStatus::Cancelled,
        )
    }

    /// Cancel requested while active
    pub fn enter_pending_cancel(&mut self) -> EngineResult<()> {
        self.transition(
            &[PolicyStatus::Active, PolicyStatus::Dispute],
            PolicyStatus::PendingCancel,
        )
    }

    /// Cancel review denied
    pub fn enter_dispute(&mut self) -> EngineResult<()> {
        self.transition(&[PolicyStatus::PendingCancel], PolicyStatus::Dispute)
    }

    /// Dispute resolved in the policyholder's favor, or a pending cancel
    /// revoked by its requester
    pub fn reactivate(&mut self) -> EngineResult<()> {
        self.transition(
            &[PolicyStatus::Dispute, PolicyStatus::PendingCancel],
            PolicyStatus::Active,
        )
    }

    /// Validity ended without renewal
    pub fn expire(&mut self) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::StateTransition {
                from: self.status.to_string(),
                to: PolicyStatus::Expired.to_string(),
            });
        }
        self.status = PolicyStatus::Expired;
        Ok(())
    }

    /// Renewal re-billing: Active | Payout -> PendingPayment
    pub fn renew(&mut self, new_coverage_end: i64, new_premium: f64) -> EngineResult<()> {
        self.transition(
            &[PolicyStatus::Active, PolicyStatus::Payout],
            PolicyStatus::PendingPayment,
        )?;
        self.coverage_end = new_coverage_end;
        self.total_farmer_premium = new_premium;
        self.premium_paid_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RegisteredPolicy {
        RegisteredPolicy {
            id: RegisteredPolicyId::new(),
            base_policy_id: BasePolicyId::new(),
            farm_id: FarmId::new(),
            farmer_id: FarmerId::new(),
            provider_id: ProviderId::new(),
            policy_number: generate_policy_number(),
            coverage_start: 0,
            coverage_end: 1_700_000_000,
            total_farmer_premium: 1_000.0,
            total_data_cost: 120.0,
            coverage_amount: 10_000.0,
            underwriting_status: UnderwritingStatus::Pending,
            status: PolicyStatus::PendingReview,
            signed_document_url: None,
            premium_paid_at: None,
            created_at: 1_690_000_000,
        }
    }

    #[test]
    fn test_policy_number_shape() {
        let n = generate_policy_number();
        assert_eq!(n.len(), 12);
        assert!(n.starts_with("AGP"));
        assert!(n[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut p = policy();
        p.approve().unwrap();
        assert_eq!(p.status, PolicyStatus::PendingPayment);
        assert_eq!(p.coverage_start, 0);

        p.record_payment(1_695_000_000).unwrap();
        assert_eq!(p.status, PolicyStatus::Active);
        assert_eq!(p.coverage_start, 1_695_000_000);

        p.enter_payout().unwrap();
        assert_eq!(p.status, PolicyStatus::Payout);
    }

    #[test]
    fn test_active_only_from_payment() {
        let mut p = policy();
        assert!(p.record_payment(1).is_err());
        assert!(p.enter_payout().is_err());
    }

    #[test]
    fn test_cancelled_is_immutable() {
        let mut p = policy();
        p.cancel().unwrap();
        assert!(p.approve().is_err());
        assert!(p.expire().is_err());
        assert!(p.enter_pending_cancel().is_err());
    }

    #[test]
    fn test_dispute_paths() {
        let mut p = policy();
        p.approve().unwrap();
        p.record_payment(1).unwrap();
        p.enter_pending_cancel().unwrap();
        p.enter_dispute().unwrap();
        p.reactivate().unwrap();
        assert_eq!(p.status, PolicyStatus::Active);
    }

    #[test]
    fn test_renew_clears_payment() {
        let mut p = policy();
        p.approve().unwrap();
        p.record_payment(1_695_000_000).unwrap();
        p.renew(1_710_000_000, 900.0).unwrap();
        assert_eq!(p.status, PolicyStatus::PendingPayment);
        assert_eq!(p.coverage_end, 1_710_000_000);
        assert_eq!(p.total_farmer_premium, 900.0);
        assert!(p.premium_paid_at.is_none());
    }
}
