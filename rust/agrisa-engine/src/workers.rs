//! Worker manager: one scheduler per monitored policy
//!
//! Owns the RegisteredPolicyId -> PolicyScheduler registry. Mutations are
//! serialized per policy id; schedulers run independently. On process
//! restart `recover_active` rebuilds schedulers for every Active policy.

use crate::domain::{PolicyTrigger, RegisteredPolicy, RegisteredPolicyId};
use crate::error::{EngineError, EngineResult};
use crate::fetch::{FetchPipeline, FetchRequest};
use crate::risk::RiskAnalyzer;
use crate::scheduler::{JobEnvelope, JobPayload, JobRunner, PolicyScheduler};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Executes engine jobs: monitoring fetches chain into risk analysis
pub struct EngineJobRunner {
    pipeline: Arc<FetchPipeline>,
    risk: Arc<dyn RiskAnalyzer>,
}

impl EngineJobRunner {
    pub fn new(pipeline: Arc<FetchPipeline>, risk: Arc<dyn RiskAnalyzer>) -> Self {
        Self { pipeline, risk }
    }
}

#[async_trait]
impl JobRunner for EngineJobRunner {
    async fn run(
        &self,
        policy_id: RegisteredPolicyId,
        payload: &JobPayload,
    ) -> EngineResult<Vec<JobEnvelope>> {
        match payload {
            JobPayload::FetchMonitoringData {
                policy_id,
                base_policy_id,
                farm_id,
                start_date,
                end_date,
                check_policy,
                inject_test,
            } => {
                let report = self
                    .pipeline
                    .fetch_farm_monitoring_data(FetchRequest {
                        policy_id: *policy_id,
                        farm_id: *farm_id,
                        base_policy_id: *base_policy_id,
                        start_ts: *start_date,
                        end_ts: *end_date,
                        check_policy: *check_policy,
                        inject_test: inject_test.clone(),
                    })
                    .await?;
                tracing::debug!(
                    policy_id = %policy_id,
                    persisted = report.persisted,
                    up_to_date = report.up_to_date,
                    claim = report.claim.is_some(),
                    "fetch job finished"
                );
                // Every fetch run, including an up-to-date one, schedules
                // a fresh risk analysis
                Ok(vec![JobEnvelope::one_shot(JobPayload::RiskAnalysis {
                    registered_policy_id: *policy_id,
                    force_reanalysis: false,
                })])
            }
            JobPayload::RiskAnalysis {
                registered_policy_id,
                force_reanalysis,
            } => {
                let assessment = self
                    .risk
                    .analyze(*registered_policy_id, *force_reanalysis)
                    .await?;
                tracing::info!(
                    policy_id = %policy_id,
                    risk_score = assessment.risk_score,
                    "risk analysis completed"
                );
                Ok(vec![])
            }
        }
    }
}

/// Registry of per-policy schedulers
pub struct WorkerManager {
    schedulers: DashMap<RegisteredPolicyId, Arc<PolicyScheduler>>,
    locks: DashMap<RegisteredPolicyId, Arc<Mutex<()>>>,
    runner: Arc<dyn JobRunner>,
}

impl WorkerManager {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            schedulers: DashMap::new(),
            locks: DashMap::new(),
            runner,
        }
    }

    fn lock_for(&self, policy_id: RegisteredPolicyId) -> Arc<Mutex<()>> {
        self.locks
            .entry(policy_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotently build the scheduler and its standing fetch job
    pub async fn create(
        &self,
        policy: &RegisteredPolicy,
        trigger: &PolicyTrigger,
    ) -> EngineResult<()> {
        let lock = self.lock_for(policy.id);
        let _guard = lock.lock().await;

        if self.schedulers.contains_key(&policy.id) {
            return Ok(());
        }

        let payload = JobPayload::FetchMonitoringData {
            policy_id: policy.id,
            base_policy_id: policy.base_policy_id,
            farm_id: policy.farm_id,
            start_date: 0,
            end_date: 0,
            check_policy: true,
            inject_test: None,
        };
        let cadence = Duration::from_secs(trigger.cadence_seconds().max(1) as u64);
        let scheduler = Arc::new(PolicyScheduler::new(
            policy.id,
            Arc::clone(&self.runner),
            JobEnvelope::periodic(payload, true),
            cadence,
        ));
        self.schedulers.insert(policy.id, scheduler);
        tracing::info!(
            policy_number = %policy.policy_number,
            cadence_secs = cadence.as_secs(),
            "worker created"
        );
        Ok(())
    }

    /// Start the policy's scheduler loop
    pub async fn start(&self, policy_id: RegisteredPolicyId) -> EngineResult<()> {
        let lock = self.lock_for(policy_id);
        let _guard = lock.lock().await;
        let scheduler = self
            .schedulers
            .get(&policy_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| EngineError::not_found("WorkerScheduler", policy_id))?;
        scheduler.start().await
    }

    /// Stop the policy's scheduler, cancelling in-flight jobs
    pub async fn stop(&self, policy_id: RegisteredPolicyId) -> EngineResult<()> {
        let lock = self.lock_for(policy_id);
        let _guard = lock.lock().await;
        let scheduler = self
            .schedulers
            .get(&policy_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| EngineError::not_found("WorkerScheduler", policy_id))?;
        scheduler.stop().await;
        Ok(())
    }

    /// Stop and retain the scheduler in an archived state
    pub async fn archive(&self, policy_id: RegisteredPolicyId) -> EngineResult<()> {
        let lock = self.lock_for(policy_id);
        let _guard = lock.lock().await;
        let scheduler = self
            .schedulers
            .get(&policy_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| EngineError::not_found("WorkerScheduler", policy_id))?;
        scheduler.archive().await;
        Ok(())
    }

    /// Tear the scheduler down entirely; absent schedulers are fine
    pub async fn cleanup(&self, policy_id: RegisteredPolicyId) -> EngineResult<()> {
        let lock = self.lock_for(policy_id);
        let _guard = lock.lock().await;
        if let Some((_, scheduler)) = self.schedulers.remove(&policy_id) {
            scheduler.stop().await;
            tracing::info!(policy_id = %policy_id, "worker cleaned up");
        }
        Ok(())
    }

    /// Handle for callers enqueuing one-shot jobs
    pub fn get_scheduler(&self, policy_id: RegisteredPolicyId) -> Option<Arc<PolicyScheduler>> {
        self.schedulers.get(&policy_id).map(|s| Arc::clone(&s))
    }

    pub fn worker_count(&self) -> usize {
        self.schedulers.len()
    }

    /// Rebuild and start schedulers for every Active policy
    pub async fn recover_active(
        &self,
        stores: &crate::store::Stores,
    ) -> EngineResult<usize> {
        let active = stores.policies.list_active().await?;
        let mut recovered = 0;
        for policy in active {
            let trigger = match stores
                .base_policies
                .trigger_for(policy.base_policy_id)
                .await?
            {
                Some(trigger) => trigger,
                None => {
                    tracing::warn!(
                        policy_number = %policy.policy_number,
                        "recovery skipped: base policy has no trigger"
                    );
                    continue;
                }
            };
            self.create(&policy, &trigger).await?;
            self.start(policy.id).await?;
            recovered += 1;
        }
        tracing::info!(recovered, "worker recovery finished");
        Ok(recovered)
    }
}
