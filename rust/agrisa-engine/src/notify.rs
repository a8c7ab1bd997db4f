//! Notification fan-out contract and the best-effort delivery wrapper
//!
//! Delivery transport is an external collaborator. The engine never lets a
//! failed notification fail the originating operation: sends are handed to
//! a background task that retries with fixed spacing up to a bounded
//! attempt count.

use crate::domain::{
    BasePolicyId, CancelRequestId, ClaimId, FarmerId, ProviderId, RegisteredPolicyId,
};
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Events fanned out to farmers and providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    ClaimGenerated {
        farmer_id: FarmerId,
        policy_id: RegisteredPolicyId,
        claim_id: ClaimId,
        total_amount: f64,
    },
    PolicyCancelled {
        farmer_id: FarmerId,
        policy_id: RegisteredPolicyId,
        reason: String,
    },
    PolicyExpired {
        farmer_id: FarmerId,
        policy_id: RegisteredPolicyId,
    },
    RenewalPending {
        farmer_id: FarmerId,
        policy_id: RegisteredPolicyId,
        new_premium: f64,
    },
    BasePolicyArchived {
        provider_id: ProviderId,
        base_policy_id: BasePolicyId,
    },
    CancelReviewed {
        policy_id: RegisteredPolicyId,
        request_id: CancelRequestId,
        approved: bool,
    },
    EarlyWarning {
        farmer_id: FarmerId,
        policy_id: RegisteredPolicyId,
        parameter_name: String,
        measured_value: f64,
        warning_threshold: f64,
    },
}

/// Notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> EngineResult<()>;
}

/// Transport that drops every event; used by tests and as a default
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: NotificationEvent) -> EngineResult<()> {
        Ok(())
    }
}

/// Bounded best-effort delivery around a transport
///
/// `send` returns immediately; delivery happens on a spawned task that
/// retries with fixed spacing until it succeeds or attempts run out.
#[derive(Clone)]
pub struct BestEffortNotifier {
    transport: Arc<dyn Notifier>,
    max_attempts: u32,
    retry_spacing: Duration,
}

impl BestEffortNotifier {
    pub fn new(transport: Arc<dyn Notifier>, max_attempts: u32, retry_spacing: Duration) -> Self {
        Self {
            transport,
            max_attempts,
            retry_spacing,
        }
    }

    /// Queue an event for delivery; never fails the caller
    pub fn send(&self, event: NotificationEvent) {
        let transport = Arc::clone(&self.transport);
        let max_attempts = self.max_attempts;
        let spacing = self.retry_spacing;
        tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                match transport.notify(event.clone()).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "notification delivery failed"
                        );
                        if attempt < max_attempts {
                            tokio::time::sleep(spacing).await;
                        }
                    }
                }
            }
            tracing::error!(?event, "notification dropped after {} attempts", max_attempts);
        });
    }
}
