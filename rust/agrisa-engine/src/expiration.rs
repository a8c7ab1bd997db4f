//! Cache key-expiration event bus
//!
//! A single subscriber listens on expired-key notifications and dispatches
//! each event on a fresh task: draft commits, renewal rollover, enrollment
//! closure, cancel finalization and payment-window cancellation. The key
//! string conventions are contract surface; changing them requires a
//! coordinated rollout.

use crate::cache::TtlCache;
use crate::cancel_flow::CancelWorkflow;
use crate::documents::DocumentStore;
use crate::domain::{BasePolicyId, CancelRequestId, ConditionId, RegisteredPolicyId};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::PolicyLifecycle;
use crate::renewal::RenewalOrchestrator;
use crate::store::Stores;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Parsed expiration key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiredKey {
    /// `{provider}--{base_policy_id}--BasePolicy--archive:{bool}--COMMIT_EVENT`
    BasePolicyCommit {
        provider: String,
        base_policy_id: BasePolicyId,
        archive: bool,
    },
    /// `{provider}--{base_policy_id}--BasePolicyTrigger--{base_policy_id}--archive:{bool}`
    TriggerCommit {
        provider: String,
        base_policy_id: BasePolicyId,
        archive: bool,
    },
    /// `{provider}--{cond_id}--BasePolicyTriggerCondition--{i}--{base_policy_id}--archive:{bool}`
    ConditionCommit {
        provider: String,
        condition_id: ConditionId,
        index: u32,
        base_policy_id: BasePolicyId,
        archive: bool,
    },
    /// `{base_policy_id}--BasePolicy--ValidDate`
    ValidityEnd { base_policy_id: BasePolicyId },
    /// `{base_policy_id}--BasePolicy--EnrollmentClosed`
    EnrollmentClosed { base_policy_id: BasePolicyId },
    /// `{request_id}--CancelRequest--NoticePeriod`
    CancelNoticePeriod { request_id: CancelRequestId },
    /// `{registered_policy_id}--RegisteredPolicy--PaymentWindow`
    PaymentWindow { policy_id: RegisteredPolicyId },
}

fn parse_archive(part: &str) -> EngineResult<bool> {
    match part {
        "archive:true" => Ok(true),
        "archive:false" => Ok(false),
        other => Err(EngineError::Validation(format!(
            "bad archive flag {:?} in expiration key",
            other
        ))),
    }
}

impl ExpiredKey {
    /// Parse a raw key; `Ok(None)` means an unknown key to be ignored,
    /// `Err` a recognized key with a malformed id (surfaced, not retried)
    pub fn parse(raw: &str) -> EngineResult<Option<Self>> {
        let parts: Vec<&str> = raw.split("--").collect();
        match parts.as_slice() {
            [provider, id, "BasePolicy", archive, "COMMIT_EVENT"] => {
                Ok(Some(ExpiredKey::BasePolicyCommit {
                    provider: provider.to_string(),
                    base_policy_id: BasePolicyId::parse_str(id)?,
                    archive: parse_archive(archive)?,
                }))
            }
            [provider, id, "BasePolicyTrigger", id2, archive] => {
                if id != id2 {
                    return Err(EngineError::Validation(format!(
                        "trigger key ids disagree: {} vs {}",
                        id, id2
                    )));
                }
                Ok(Some(ExpiredKey::TriggerCommit {
                    provider: provider.to_string(),
                    base_policy_id: BasePolicyId::parse_str(id)?,
                    archive: parse_archive(archive)?,
                }))
            }
            [provider, cond_id, "BasePolicyTriggerCondition", index, base_id, archive] => {
                Ok(Some(ExpiredKey::ConditionCommit {
                    provider: provider.to_string(),
                    condition_id: ConditionId::parse_str(cond_id)?,
                    index: index.parse().map_err(|_| {
                        EngineError::Validation(format!(
                            "bad condition index {:?} in expiration key",
                            index
                        ))
                    })?,
                    base_policy_id: BasePolicyId::parse_str(base_id)?,
                    archive: parse_archive(archive)?,
                }))
            }
            [id, "BasePolicy", "ValidDate"] => Ok(Some(ExpiredKey::ValidityEnd {
                base_policy_id: BasePolicyId::parse_str(id)?,
            })),
            [id, "BasePolicy", "EnrollmentClosed"] => Ok(Some(ExpiredKey::EnrollmentClosed {
                base_policy_id: BasePolicyId::parse_str(id)?,
            })),
            [id, "CancelRequest", "NoticePeriod"] => Ok(Some(ExpiredKey::CancelNoticePeriod {
                request_id: CancelRequestId::parse_str(id)?,
            })),
            [id, "RegisteredPolicy", "PaymentWindow"] => Ok(Some(ExpiredKey::PaymentWindow {
                policy_id: RegisteredPolicyId::parse_str(id)?,
            })),
            _ => Ok(None),
        }
    }

    /// Render the key in its wire form
    pub fn format(&self) -> String {
        match self {
            ExpiredKey::BasePolicyCommit {
                provider,
                base_policy_id,
                archive,
            } => format!(
                "{}--{}--BasePolicy--archive:{}--COMMIT_EVENT",
                provider, base_policy_id, archive
            ),
            ExpiredKey::TriggerCommit {
                provider,
                base_policy_id,
                archive,
            } => format!(
                "{}--{}--BasePolicyTrigger--{}--archive:{}",
                provider, base_policy_id, base_policy_id, archive
            ),
            ExpiredKey::ConditionCommit {
                provider,
                condition_id,
                index,
                base_policy_id,
                archive,
            } => format!(
                "{}--{}--BasePolicyTriggerCondition--{}--{}--archive:{}",
                provider, condition_id, index, base_policy_id, archive
            ),
            ExpiredKey::ValidityEnd { base_policy_id } => {
                format!("{}--BasePolicy--ValidDate", base_policy_id)
            }
            ExpiredKey::EnrollmentClosed { base_policy_id } => {
                format!("{}--BasePolicy--EnrollmentClosed", base_policy_id)
            }
            ExpiredKey::CancelNoticePeriod { request_id } => {
                format!("{}--CancelRequest--NoticePeriod", request_id)
            }
            ExpiredKey::PaymentWindow { policy_id } => {
                format!("{}--RegisteredPolicy--PaymentWindow", policy_id)
            }
        }
    }
}

/// Bus processing counters
#[derive(Debug, Clone, Default)]
pub struct ExpirationStats {
    pub total_expired: u64,
    pub successful_commits: u64,
    pub failed_commits: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Health verdict from the bus
#[derive(Debug, Clone)]
pub struct BusHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
}

/// Subscriber dispatching expired-key events
pub struct ExpirationBus {
    cache: Arc<TtlCache>,
    stores: Stores,
    renewal: Arc<RenewalOrchestrator>,
    lifecycle: Arc<PolicyLifecycle>,
    cancel_flow: Arc<CancelWorkflow>,
    documents: Arc<dyn DocumentStore>,
    stats: Arc<RwLock<ExpirationStats>>,
}

impl ExpirationBus {
    pub fn new(
        cache: Arc<TtlCache>,
        stores: Stores,
        renewal: Arc<RenewalOrchestrator>,
        lifecycle: Arc<PolicyLifecycle>,
        cancel_flow: Arc<CancelWorkflow>,
        documents: Arc<dyn DocumentStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            stores,
            renewal,
            lifecycle,
            cancel_flow,
            documents,
            stats: Arc::new(RwLock::new(ExpirationStats::default())),
        })
    }

    /// Start the single subscriber loop
    ///
    /// Each event is dispatched on a fresh task behind an error boundary;
    /// the loop itself never blocks on handler completion.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let bus = self;
        let mut expired = bus.cache.subscribe_expired();
        tokio::spawn(async move {
            loop {
                let key = match expired.recv().await {
                    Ok(key) => key,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "expiration subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                bus.stats.write().total_expired += 1;

                let event = match ExpiredKey::parse(&key) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        tracing::debug!(%key, "ignoring unknown expired key");
                        continue;
                    }
                    Err(e) => {
                        // Malformed ids are surfaced and dropped, never retried
                        tracing::error!(%key, error = %e, "unparseable expired key");
                        let mut stats = bus.stats.write();
                        stats.failed_commits += 1;
                        stats.last_processed = Some(Utc::now());
                        continue;
                    }
                };

                let handler = Arc::clone(&bus);
                tokio::spawn(async move {
                    let result = handler.handle_event(event.clone()).await;
                    let mut stats = handler.stats.write();
                    stats.last_processed = Some(Utc::now());
                    match result {
                        Ok(()) => stats.successful_commits += 1,
                        Err(e) => {
                            stats.failed_commits += 1;
                            tracing::error!(?event, error = %e, "expiration handler failed");
                        }
                    }
                });
            }
            tracing::info!("expiration bus stopped");
        })
    }

    /// Handle one expiration event; every arm is idempotent on re-delivery
    pub async fn handle_event(&self, event: ExpiredKey) -> EngineResult<()> {
        match event {
            ExpiredKey::BasePolicyCommit {
                base_policy_id,
                archive,
                ..
            } => {
                if archive {
                    let mut base_policy = self
                        .stores
                        .base_policies
                        .get_base_policy(base_policy_id)
                        .await?
                        .ok_or_else(|| EngineError::not_found("BasePolicy", base_policy_id))?;
                    if base_policy.status == crate::domain::BasePolicyStatus::Draft {
                        base_policy.commit_draft()?;
                        self.stores
                            .base_policies
                            .update_base_policy(&base_policy)
                            .await?;
                        tracing::info!(%base_policy_id, "draft base policy committed");
                    }
                } else {
                    self.documents.delete_temp(base_policy_id).await?;
                    tracing::info!(%base_policy_id, "temp draft documents deleted");
                }
                Ok(())
            }
            ExpiredKey::TriggerCommit {
                base_policy_id,
                archive,
                ..
            } => {
                // archive:true means the trigger was committed with its
                // policy; only the abandoned-draft path needs cleanup
                if !archive {
                    self.stores.base_policies.delete_trigger(base_policy_id).await?;
                    tracing::info!(%base_policy_id, "abandoned draft trigger deleted");
                }
                Ok(())
            }
            ExpiredKey::ConditionCommit {
                condition_id,
                archive,
                ..
            } => {
                if !archive {
                    self.stores.base_policies.delete_condition(condition_id).await?;
                    tracing::info!(%condition_id, "abandoned draft condition deleted");
                }
                Ok(())
            }
            ExpiredKey::ValidityEnd { base_policy_id } => {
                self.renewal.prepare_renewal(base_policy_id).await?;
                Ok(())
            }
            ExpiredKey::EnrollmentClosed { base_policy_id } => {
                let mut base_policy = self
                    .stores
                    .base_policies
                    .get_base_policy(base_policy_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("BasePolicy", base_policy_id))?;
                base_policy.close_enrollment();
                self.stores
                    .base_policies
                    .update_base_policy(&base_policy)
                    .await?;
                tracing::info!(%base_policy_id, "enrollment closed");
                Ok(())
            }
            ExpiredKey::CancelNoticePeriod { request_id } => {
                self.cancel_flow.finalize_notice_period(request_id).await
            }
            ExpiredKey::PaymentWindow { policy_id } => {
                self.lifecycle.handle_payment_window_expired(policy_id).await
            }
        }
    }

    pub fn stats(&self) -> ExpirationStats {
        self.stats.read().clone()
    }

    /// Flag a stale or failure-heavy bus
    pub fn health_check(&self) -> BusHealth {
        let stats = self.stats.read();
        let mut issues = Vec::new();

        if let Some(last) = stats.last_processed {
            if stats.total_expired > 0 && Utc::now() - last > chrono::Duration::minutes(10) {
                issues.push(format!(
                    "no expiration processed since {} despite prior traffic",
                    last
                ));
            }
        }
        let handled = stats.successful_commits + stats.failed_commits;
        if handled > 0 && stats.failed_commits * 2 > handled {
            issues.push(format!(
                "failure rate {}/{} exceeds 50%",
                stats.failed_commits, handled
            ));
        }

        BusHealth {
            healthy: issues.is_empty(),
            issues,
        }
    }
}
