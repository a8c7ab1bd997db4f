//! Farm monitoring data fetch pipeline
//!
//! One pipeline run resolves a policy's trigger conditions, works out the
//! incremental start per parameter, fans the (condition, parameter) fetches
//! out over a bounded worker pool with retries, persists the canonical
//! measurements, and feeds the trigger evaluator and claim generator.

use crate::claims::ClaimGenerator;
use crate::domain::{
    BasePolicyId, Claim, DataSource, Farm, FarmId, FarmMonitoringData, RegisteredPolicyId,
    TriggerCondition,
};
use crate::error::{EngineError, EngineResult};
use crate::evaluator::{EvaluationOutcome, TriggerEvaluator};
use crate::providers::{format_api_date, ProviderClient};
use crate::providers::{satellite, weather};
use crate::store::Stores;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DAY_SECONDS: i64 = 86_400;

/// Fetch pipeline tuning
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound on concurrent fetch workers; effective pool is
    /// min(this, number of conditions)
    pub max_workers: usize,
    /// Attempts per (condition, parameter) fetch
    pub max_retries: u32,
    /// Base of the exponential backoff; attempt n sleeps base * 2^n
    pub retry_base: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_retries: 3,
            retry_base: Duration::from_secs(1),
        }
    }
}

/// One fetch invocation
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub policy_id: RegisteredPolicyId,
    pub farm_id: FarmId,
    pub base_policy_id: BasePolicyId,
    /// 0 derives the start from the trigger's monitoring interval
    pub start_ts: i64,
    /// 0 means now
    pub end_ts: i64,
    /// Run the trigger evaluator over the fresh data
    pub check_policy: bool,
    /// Test payload that bypasses the network fetch entirely
    pub inject_test: Option<Vec<FarmMonitoringData>>,
}

/// What one pipeline run did
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Records actually persisted (after dedup)
    pub persisted: usize,
    pub fetched_parameters: Vec<String>,
    /// Parameters already current with respect to end_ts
    pub skipped_parameters: Vec<String>,
    pub failed_parameters: Vec<String>,
    /// Evaluation outcome when check_policy was set
    pub evaluation: Option<EvaluationOutcome>,
    pub claim: Option<Claim>,
    /// Every parameter was already up to date; nothing was fetched
    pub up_to_date: bool,
}

struct FetchJob {
    condition: TriggerCondition,
    source: DataSource,
    param_start: i64,
}

struct FetchResult {
    parameter: String,
    outcome: EngineResult<(Vec<FarmMonitoringData>, Option<String>)>,
}

/// The monitoring data fetch pipeline
pub struct FetchPipeline {
    stores: Stores,
    client: Arc<ProviderClient>,
    evaluator: TriggerEvaluator,
    claims: Arc<ClaimGenerator>,
    config: FetchConfig,
}

impl FetchPipeline {
    pub fn new(
        stores: Stores,
        client: Arc<ProviderClient>,
        claims: Arc<ClaimGenerator>,
        config: FetchConfig,
    ) -> Self {
        Self {
            stores,
            client,
            evaluator: TriggerEvaluator::new(),
            claims,
            config,
        }
    }

    /// Run one fetch for a registered policy
    ///
    /// Fails only when every data source in the batch failed; partial
    /// failures are logged and the run continues.
    pub async fn fetch_farm_monitoring_data(
        &self,
        request: FetchRequest,
    ) -> EngineResult<FetchReport> {
        let policy = self
            .stores
            .policies
            .get_policy(request.policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("RegisteredPolicy", request.policy_id))?;
        let base_policy = self
            .stores
            .base_policies
            .get_base_policy(request.base_policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("BasePolicy", request.base_policy_id))?;
        let trigger = self
            .stores
            .base_policies
            .trigger_for(request.base_policy_id)
            .await?
            .ok_or_else(|| EngineError::not_found("PolicyTrigger", request.base_policy_id))?;
        let conditions = self.stores.base_policies.conditions_for(trigger.id).await?;

        let now = Utc::now();
        let now_ts = now.timestamp();
        let end_ts = if request.end_ts == 0 {
            now_ts
        } else {
            request.end_ts
        };
        let start_ts = if request.start_ts == 0 {
            now_ts - trigger.cadence_seconds()
        } else {
            request.start_ts
        };

        let mut report = FetchReport::default();

        // Test payloads skip the network but still go through validation,
        // persistence and evaluation
        let fetched: Vec<FarmMonitoringData> = if let Some(injected) = request.inject_test {
            for record in &injected {
                if !(0.0..=1.0).contains(&record.confidence_score) {
                    return Err(EngineError::Validation(format!(
                        "injected record confidence {} outside [0, 1]",
                        record.confidence_score
                    )));
                }
            }
            tracing::info!(
                policy_number = %policy.policy_number,
                records = injected.len(),
                "using injected test payload, network fetch bypassed"
            );
            injected
        } else {
            let farm = self
                .stores
                .farms
                .get_farm(request.farm_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Farm", request.farm_id))?;
            farm.boundary.outer_ring()?;

            // Per-parameter incremental starts
            let mut jobs = Vec::new();
            for condition in &conditions {
                let source = match self
                    .stores
                    .data_sources
                    .get_data_source(condition.data_source_id)
                    .await?
                {
                    Some(source) if source.active => source,
                    Some(source) => {
                        tracing::warn!(
                            condition_id = %condition.id,
                            parameter = %source.parameter_name,
                            "condition skipped: data source inactive"
                        );
                        continue;
                    }
                    None => {
                        tracing::warn!(
                            condition_id = %condition.id,
                            "condition skipped: no data source"
                        );
                        continue;
                    }
                };

                let latest = self
                    .stores
                    .monitoring
                    .latest_timestamp(request.farm_id, &source.parameter_name)
                    .await?;
                if latest >= end_ts {
                    report.skipped_parameters.push(source.parameter_name.clone());
                    continue;
                }
                let param_start = if latest > 0 {
                    latest + DAY_SECONDS
                } else {
                    start_ts
                };
                jobs.push(FetchJob {
                    condition: condition.clone(),
                    source,
                    param_start,
                });
            }

            if jobs.is_empty() {
                tracing::info!(
                    policy_number = %policy.policy_number,
                    "all parameters up to date, skipping fetch"
                );
                report.up_to_date = true;
                return Ok(report);
            }

            self.run_workers(&farm, jobs, end_ts, &mut report).await?
        };

        report.persisted = self.stores.monitoring.create_batch(&fetched).await?;
        tracing::info!(
            policy_number = %policy.policy_number,
            fetched = fetched.len(),
            persisted = report.persisted,
            "monitoring records persisted"
        );

        if request.check_policy {
            let horizon_days = conditions
                .iter()
                .map(|c| {
                    i64::from(c.aggregation_window_days)
                        + i64::from(c.baseline_window_days.unwrap_or(0))
                })
                .max()
                .unwrap_or(0)
                + 1;
            let historical = self
                .stores
                .monitoring
                .get_by_time_range(request.farm_id, now_ts - horizon_days * DAY_SECONDS, now_ts)
                .await?;

            let outcome = self.evaluator.evaluate(
                &trigger,
                &conditions,
                &fetched,
                &historical,
                policy.coverage_start,
                now,
            );

            // Claims only arise while coverage is in force; Payout still
            // routes through the generator so dedup returns the claim
            if outcome.satisfied
                && !outcome.triggered.is_empty()
                && matches!(
                    policy.status,
                    crate::domain::PolicyStatus::Active | crate::domain::PolicyStatus::Payout
                )
            {
                let claim = self
                    .claims
                    .generate(&policy, &base_policy, trigger.id, &outcome.triggered, now_ts)
                    .await?;
                report.claim = Some(claim);
            }
            report.evaluation = Some(outcome);
        }

        Ok(report)
    }

    /// Fan jobs out over min(max_workers, |jobs|) workers on a bounded
    /// job channel and collect their results
    async fn run_workers(
        &self,
        farm: &Farm,
        jobs: Vec<FetchJob>,
        end_ts: i64,
        report: &mut FetchReport,
    ) -> EngineResult<Vec<FarmMonitoringData>> {
        let job_count = jobs.len();
        let worker_count = self.config.max_workers.min(job_count).max(1);

        let (job_tx, job_rx) = mpsc::channel::<FetchJob>(job_count);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<FetchResult>(job_count);

        for job in jobs {
            // Capacity equals the job count, so sends cannot block
            let _ = job_tx.send(job).await;
        }
        drop(job_tx);

        let ring: Arc<Vec<[f64; 2]>> = Arc::new(farm.boundary.outer_ring()?.to_vec());
        let corners = farm.boundary.corners().ok();

        for _ in 0..worker_count {
            let worker = FetchWorker {
                client: Arc::clone(&self.client),
                farm_id: farm.id,
                ring: Arc::clone(&ring),
                corners,
                end_ts,
                max_retries: self.config.max_retries,
                retry_base: self.config.retry_base,
            };
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    let parameter = job.source.parameter_name.clone();
                    let outcome = worker.fetch_one(&job).await;
                    if result_tx.send(FetchResult { parameter, outcome }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut fetched = Vec::new();
        let mut failed = 0;
        while let Some(result) = result_rx.recv().await {
            match result.outcome {
                Ok((records, polygon_id)) => {
                    report.fetched_parameters.push(result.parameter);
                    fetched.extend(records);
                    if let Some(polygon_id) = polygon_id {
                        if farm.provider_polygon_id.as_deref() != Some(polygon_id.as_str()) {
                            // Best-effort write-back; never fails the run
                            if let Err(e) = self
                                .stores
                                .farms
                                .update_polygon_id(farm.id, &polygon_id)
                                .await
                            {
                                tracing::warn!(
                                    farm_id = %farm.id,
                                    error = %e,
                                    "polygon id write-back failed"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        parameter = %result.parameter,
                        error = %e,
                        "data source fetch failed"
                    );
                    report.failed_parameters.push(result.parameter);
                }
            }
        }

        if failed == job_count {
            return Err(EngineError::UpstreamTransient(
                "all data sources failed".to_string(),
            ));
        }
        Ok(fetched)
    }
}

struct FetchWorker {
    client: Arc<ProviderClient>,
    farm_id: FarmId,
    ring: Arc<Vec<[f64; 2]>>,
    corners: Option<[[f64; 2]; 4]>,
    end_ts: i64,
    max_retries: u32,
    retry_base: Duration,
}

impl FetchWorker {
    /// Execute one (condition, parameter) fetch with bounded retries
    async fn fetch_one(
        &self,
        job: &FetchJob,
    ) -> EngineResult<(Vec<FarmMonitoringData>, Option<String>)> {
        let mut last_error = EngineError::Internal("retry loop never ran".to_string());
        for attempt in 1..=self.max_retries {
            match self.fetch_attempt(job).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable || attempt == self.max_retries {
                        break;
                    }
                    let backoff = self.retry_base * 2u32.pow(attempt);
                    tracing::debug!(
                        parameter = %job.source.parameter_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "fetch attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        Err(last_error)
    }

    async fn fetch_attempt(
        &self,
        job: &FetchJob,
    ) -> EngineResult<(Vec<FarmMonitoringData>, Option<String>)> {
        let source = &job.source;
        if source.is_satellite() {
            let response = self
                .client
                .fetch_satellite(
                    &source.api_endpoint,
                    &self.ring,
                    &format_api_date(job.param_start),
                    &format_api_date(self.end_ts),
                    &source.parameter_name,
                )
                .await?;
            let records = satellite::to_measurements(
                &response,
                self.farm_id,
                job.condition.id,
                &source.parameter_name,
                &source.unit,
                &source.provider,
            );
            Ok((records, None))
        } else if source.is_weather() {
            let corners = self.corners.ok_or_else(|| {
                EngineError::Validation(
                    "weather fetch needs at least 4 boundary points".to_string(),
                )
            })?;
            let response = self
                .client
                .fetch_weather(
                    &source.api_endpoint,
                    corners,
                    job.param_start,
                    self.end_ts,
                    &source.parameter_name,
                )
                .await?;
            let polygon_id = response.polygon_id.clone();
            let records = weather::to_measurements(
                &response,
                self.farm_id,
                job.condition.id,
                &source.parameter_name,
                &source.provider,
            );
            Ok((records, polygon_id))
        } else {
            Err(EngineError::Validation(format!(
                "endpoint {:?} is neither satellite nor weather",
                source.api_endpoint
            )))
        }
    }
}
