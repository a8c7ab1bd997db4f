//! Cancel requests and the dispute workflow states

use crate::domain::ids::{CancelRequestId, FarmerId, ProviderId, RegisteredPolicyId};
use serde::{Deserialize, Serialize};

/// Who raised or reviewed a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id")]
pub enum Party {
    Farmer(FarmerId),
    Provider(ProviderId),
}

/// Reason category for a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelRequestType {
    Other,
    /// Provider-initiated bulk reassignment of its active policies
    TransferContract,
    Relocation,
    CropChange,
}

/// Cancel request review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelRequestStatus {
    PendingReview,
    /// Approved; the policy is in its notice period
    Approved,
    Denied,
    /// Denied and escalated to dispute resolution
    Litigation,
    /// Revoked by the requester before review completed
    Cancelled,
    PaymentFailed,
}

/// Request to cancel a registered policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub id: CancelRequestId,
    pub policy_id: RegisteredPolicyId,
    pub request_type: CancelRequestType,
    pub status: CancelRequestStatus,
    pub compensation_amount: f64,
    /// Whether the request was raised during an existing notice period
    pub during_notice_period: bool,
    pub requested_by: Party,
    pub reviewed_by: Option<Party>,
    /// Receiving provider for transfer-contract requests
    pub transfer_to: Option<ProviderId>,
    pub created_at: i64,
    pub reviewed_at: Option<i64>,
}

impl CancelRequest {
    /// Age of the request in seconds at `now`
    pub fn age_seconds(&self, now: i64) -> i64 {
        now - self.created_at
    }
}
