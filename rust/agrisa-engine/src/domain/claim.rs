//! Payout claims synthesized by the trigger engine

use crate::domain::ids::{BasePolicyId, ClaimId, FarmId, RegisteredPolicyId, TriggerId};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Claim review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    /// Synthesized by the engine, awaiting review or auto-approval
    Generated,
    PendingPartnerReview,
    Approved,
    Rejected,
    Paid,
}

/// A payout claim against a registered policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    /// "CLM" + 9 alphanumerics
    pub claim_number: String,
    pub registered_policy_id: RegisteredPolicyId,
    pub base_policy_id: BasePolicyId,
    pub farm_id: FarmId,
    pub trigger_id: TriggerId,
    /// When the trigger evaluated true, unix seconds
    pub trigger_timestamp: i64,
    pub calculated_fix_payout: f64,
    pub threshold_payout: f64,
    /// Clamped sum of fix and threshold payouts
    pub total_amount: f64,
    /// Largest overshoot across triggered conditions
    pub over_threshold_value: f64,
    /// Deadline for partner review before auto-approval, unix seconds
    pub auto_approval_deadline: i64,
    /// Structured evidence map: triggered_at, conditions_count,
    /// generation_method, per-condition detail
    pub evidence_summary: serde_json::Value,
    pub status: ClaimStatus,
    pub auto_generated: bool,
    pub created_at: i64,
}

impl Claim {
    /// Partner review outcome
    pub fn review(&mut self, approved: bool) -> EngineResult<()> {
        match self.status {
            ClaimStatus::Generated | ClaimStatus::PendingPartnerReview => {
                self.status = if approved {
                    ClaimStatus::Approved
                } else {
                    ClaimStatus::Rejected
                };
                Ok(())
            }
            _ => Err(EngineError::StateTransition {
                from: format!("{:?}", self.status),
                to: if approved { "Approved" } else { "Rejected" }.to_string(),
            }),
        }
    }

    /// Record payout settlement
    pub fn mark_paid(&mut self) -> EngineResult<()> {
        match self.status {
            ClaimStatus::Approved => {
                self.status = ClaimStatus::Paid;
                Ok(())
            }
            _ => Err(EngineError::StateTransition {
                from: format!("{:?}", self.status),
                to: "Paid".to_string(),
            }),
        }
    }
}
