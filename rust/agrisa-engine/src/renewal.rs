//! Renewal orchestration
//!
//! Runs when a base policy's validity cache key expires: either rolls the
//! validity window forward and re-bills the linked policies, or — without
//! auto-renewal — archives the product and expires its policies.

use crate::domain::{BasePolicy, BasePolicyId, PolicyStatus, RegisteredPolicy, ValidityWindow};
use crate::error::{EngineError, EngineResult};
use crate::notify::{BestEffortNotifier, NotificationEvent};
use crate::store::Stores;
use crate::workers::WorkerManager;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RENEWAL_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Renewal premium: the discount applies only in (0, 100) exclusive
///
/// A discount of exactly 100 falls back to the original premium; zeroing
/// a premium through the discount path is never allowed.
pub fn calculate_renewal_premium(original: f64, discount_rate: f64) -> f64 {
    if discount_rate > 0.0 && discount_rate < 100.0 {
        original * (1.0 - discount_rate / 100.0)
    } else {
        original
    }
}

/// Outcome of one renewal pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Window advanced; carries counts of (re-billed, expired) policies
    Renewed { rebilled: usize, expired: usize },
    /// Base policy had auto-renewal off and was archived
    Expired { policies_expired: usize },
    /// Repeat invocation inside the dedup window
    AlreadyProcessed,
}

/// Orchestrates validity-window rollover for base policies
pub struct RenewalOrchestrator {
    stores: Stores,
    workers: Arc<WorkerManager>,
    notifier: BestEffortNotifier,
    /// Re-delivered expiry signals inside this window are no-ops
    recent: DashMap<BasePolicyId, Instant>,
}

impl RenewalOrchestrator {
    pub fn new(stores: Stores, workers: Arc<WorkerManager>, notifier: BestEffortNotifier) -> Self {
        Self {
            stores,
            workers,
            notifier,
            recent: DashMap::new(),
        }
    }

    /// Handle a validity-window end for a base policy
    pub async fn prepare_renewal(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<RenewalOutcome> {
        if let Some(last) = self.recent.get(&base_policy_id) {
            if last.elapsed() < RENEWAL_DEDUP_WINDOW {
                tracing::info!(
                    base_policy_id = %base_policy_id,
                    "renewal already processed, skipping re-delivery"
                );
                return Ok(RenewalOutcome::AlreadyProcessed);
            }
        }

        let mut base_policy = self
            .stores
            .base_policies
            .get_base_policy(base_policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("BasePolicy", base_policy_id))?;
        if base_policy.status == crate::domain::BasePolicyStatus::Archived {
            return Err(EngineError::StateTransition {
                from: "Archived".to_string(),
                to: "Renewed".to_string(),
            });
        }

        let policies = self
            .stores
            .policies
            .list_by_base_policy(base_policy_id)
            .await?;

        let outcome = if base_policy.auto_renewal {
            self.renew(&mut base_policy, policies).await?
        } else {
            self.prepare_expired(&mut base_policy, policies).await?
        };

        self.recent.insert(base_policy_id, Instant::now());
        Ok(outcome)
    }

    /// Advance the validity window and re-bill linked policies
    async fn renew(
        &self,
        base_policy: &mut BasePolicy,
        policies: Vec<RegisteredPolicy>,
    ) -> EngineResult<RenewalOutcome> {
        let next: ValidityWindow = base_policy
            .validity
            .next(base_policy.coverage_duration_days);
        next.validate(base_policy.coverage_duration_days)?;
        base_policy.validity = next;
        self.stores
            .base_policies
            .update_base_policy(base_policy)
            .await?;
        tracing::info!(
            base_policy_id = %base_policy.id,
            from_day = next.from_day,
            to_day = next.to_day,
            "validity window advanced"
        );

        let mut rebilled = 0;
        let mut expired = 0;
        for mut policy in policies {
            match policy.status {
                PolicyStatus::Cancelled | PolicyStatus::Rejected => continue,
                PolicyStatus::Active | PolicyStatus::Payout => {
                    let new_premium = calculate_renewal_premium(
                        policy.total_farmer_premium,
                        base_policy.renewal_discount_rate,
                    );
                    policy.renew(i64::from(next.to_day), new_premium)?;
                    self.stores.policies.update_policy(&policy).await?;
                    // Monitoring is torn down here and rebuilt on payment
                    self.workers.cleanup(policy.id).await?;
                    self.notifier.send(NotificationEvent::RenewalPending {
                        farmer_id: policy.farmer_id,
                        policy_id: policy.id,
                        new_premium,
                    });
                    rebilled += 1;
                }
                _ => {
                    policy.expire()?;
                    self.stores.policies.update_policy(&policy).await?;
                    self.workers.cleanup(policy.id).await?;
                    self.notifier.send(NotificationEvent::PolicyExpired {
                        farmer_id: policy.farmer_id,
                        policy_id: policy.id,
                    });
                    expired += 1;
                }
            }
        }

        Ok(RenewalOutcome::Renewed { rebilled, expired })
    }

    /// No auto-renewal: archive the product, expire its policies
    async fn prepare_expired(
        &self,
        base_policy: &mut BasePolicy,
        policies: Vec<RegisteredPolicy>,
    ) -> EngineResult<RenewalOutcome> {
        base_policy.archive();
        self.stores
            .base_policies
            .update_base_policy(base_policy)
            .await?;
        self.notifier.send(NotificationEvent::BasePolicyArchived {
            provider_id: base_policy.provider_id,
            base_policy_id: base_policy.id,
        });

        let mut policies_expired = 0;
        for mut policy in policies {
            if policy.status.is_terminal() {
                continue;
            }
            policy.expire()?;
            self.stores.policies.update_policy(&policy).await?;
            self.workers.cleanup(policy.id).await?;
            self.notifier.send(NotificationEvent::PolicyExpired {
                farmer_id: policy.farmer_id,
                policy_id: policy.id,
            });
            policies_expired += 1;
        }

        tracing::info!(
            base_policy_id = %base_policy.id,
            policies_expired,
            "base policy archived without renewal"
        );
        Ok(RenewalOutcome::Expired { policies_expired })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_applies_in_open_interval() {
        assert_eq!(calculate_renewal_premium(1_000.0, 10.0), 900.0);
        assert_eq!(calculate_renewal_premium(1_000.0, 0.0), 1_000.0);
        // 100 percent is a guard value, not a free policy
        assert_eq!(calculate_renewal_premium(1_000.0, 100.0), 1_000.0);
    }
}
