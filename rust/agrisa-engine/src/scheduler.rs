//! Per-policy job scheduler
//!
//! One scheduler instance exists per monitored policy. Jobs carry a
//! uniform envelope (job id, type, retries, one_time, run_now) with a
//! typed payload per job type. A single worker loop per scheduler
//! serializes execution within the policy; schedulers interleave freely
//! across policies. Stop cancels in-flight work.

use crate::domain::{BasePolicyId, FarmId, FarmMonitoringData, RegisteredPolicyId};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

const JOB_QUEUE_CAPACITY: usize = 64;

/// Typed job payloads; the envelope stays uniform across types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "kebab-case")]
pub enum JobPayload {
    #[serde(rename = "fetch-farm-monitoring-data")]
    FetchMonitoringData {
        policy_id: RegisteredPolicyId,
        base_policy_id: BasePolicyId,
        farm_id: FarmId,
        start_date: i64,
        end_date: i64,
        #[serde(default)]
        check_policy: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inject_test: Option<Vec<FarmMonitoringData>>,
    },
    #[serde(rename = "risk-analysis")]
    RiskAnalysis {
        registered_policy_id: RegisteredPolicyId,
        #[serde(default)]
        force_reanalysis: bool,
    },
}

impl JobPayload {
    /// Stable wire name of the job type
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::FetchMonitoringData { .. } => "fetch-farm-monitoring-data",
            JobPayload::RiskAnalysis { .. } => "risk-analysis",
        }
    }
}

/// Job envelope with the stable wire shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub max_retries: u32,
    pub one_time: bool,
    pub run_now: bool,
}

impl JobEnvelope {
    /// A one-shot job that runs as soon as the scheduler dequeues it
    pub fn one_shot(payload: JobPayload) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            payload,
            max_retries: 3,
            one_time: true,
            run_now: true,
        }
    }

    /// The standing periodic job for a scheduler
    pub fn periodic(payload: JobPayload, run_now: bool) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            payload,
            max_retries: 3,
            one_time: false,
            run_now,
        }
    }
}

/// Executes job payloads; follow-up jobs returned are enqueued on the
/// same scheduler
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        policy_id: RegisteredPolicyId,
        payload: &JobPayload,
    ) -> EngineResult<Vec<JobEnvelope>>;
}

/// Execution counters for one scheduler
#[derive(Debug, Default)]
struct SchedulerCounters {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Scheduler bound to one registered policy
pub struct PolicyScheduler {
    policy_id: RegisteredPolicyId,
    runner: Arc<dyn JobRunner>,
    periodic: JobEnvelope,
    cadence: Duration,
    retry_base: Duration,
    job_tx: mpsc::Sender<JobEnvelope>,
    job_rx: Mutex<Option<mpsc::Receiver<JobEnvelope>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    running: AtomicBool,
    archived: AtomicBool,
    counters: Arc<SchedulerCounters>,
}

impl PolicyScheduler {
    pub fn new(
        policy_id: RegisteredPolicyId,
        runner: Arc<dyn JobRunner>,
        periodic: JobEnvelope,
        cadence: Duration,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        Self {
            policy_id,
            runner,
            periodic,
            cadence,
            retry_base: Duration::from_secs(1),
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            shutdown_tx: Mutex::new(None),
            running: AtomicBool::new(false),
            archived: AtomicBool::new(false),
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    /// Override the retry backoff base (tests use millisecond bases)
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub fn policy_id(&self) -> RegisteredPolicyId {
        self.policy_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            executed: self.counters.executed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Enqueue a one-shot job; fails once the scheduler has stopped
    pub async fn enqueue(&self, job: JobEnvelope) -> EngineResult<()> {
        self.job_tx.send(job).await.map_err(|_| {
            EngineError::Internal(format!(
                "scheduler for policy {} is not accepting jobs",
                self.policy_id
            ))
        })
    }

    /// Start the worker loop; a second start is a no-op
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(job_rx) = self.job_rx.lock().await.take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(EngineError::Internal(format!(
                "scheduler for policy {} was stopped and cannot restart",
                self.policy_id
            )));
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let worker = WorkerLoop {
            policy_id: self.policy_id,
            runner: Arc::clone(&self.runner),
            periodic: self.periodic.clone(),
            cadence: self.cadence,
            retry_base: self.retry_base,
            job_tx: self.job_tx.clone(),
            counters: Arc::clone(&self.counters),
        };
        tokio::spawn(worker.run(job_rx, shutdown_rx));
        tracing::info!(policy_id = %self.policy_id, "scheduler started");
        Ok(())
    }

    /// Stop the worker loop, cancelling any in-flight job
    pub async fn stop(&self) {
        if let Some(shutdown) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown.send(true);
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(policy_id = %self.policy_id, "scheduler stopped");
    }

    /// Stop and mark the scheduler archived
    pub async fn archive(&self) {
        self.archived.store(true, Ordering::SeqCst);
        self.stop().await;
    }

}

/// Owned state of one running scheduler loop
struct WorkerLoop {
    policy_id: RegisteredPolicyId,
    runner: Arc<dyn JobRunner>,
    periodic: JobEnvelope,
    cadence: Duration,
    retry_base: Duration,
    job_tx: mpsc::Sender<JobEnvelope>,
    counters: Arc<SchedulerCounters>,
}

impl WorkerLoop {
    async fn run(
        self,
        mut job_rx: mpsc::Receiver<JobEnvelope>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        // The interval's immediate first tick gives run_now semantics;
        // without run_now the first firing waits one full cadence
        let start_at = if self.periodic.run_now {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + self.cadence
        };
        let mut ticker = tokio::time::interval_at(start_at, self.cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let mut job = self.periodic.clone();
                    job.job_id = Uuid::new_v4().to_string();
                    self.execute(job, &mut shutdown_rx).await;
                }
                job = job_rx.recv() => {
                    let Some(job) = job else { break };
                    self.execute(job, &mut shutdown_rx).await;
                }
            }
        }
        tracing::debug!(policy_id = %self.policy_id, "scheduler loop exited");
    }

    /// Run one job with bounded retries; a shutdown signal cancels the
    /// in-flight attempt
    async fn execute(&self, job: JobEnvelope, shutdown_rx: &mut watch::Receiver<bool>) {
        self.counters.executed.fetch_add(1, Ordering::Relaxed);

        for attempt in 0..=job.max_retries {
            let run = self.runner.run(self.policy_id, &job.payload);
            let result = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    tracing::info!(
                        policy_id = %self.policy_id,
                        job_id = %job.job_id,
                        "job cancelled by scheduler stop"
                    );
                    return;
                }
                result = run => result,
            };

            match result {
                Ok(follow_ups) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    for follow_up in follow_ups {
                        if self.job_tx.send(follow_up).await.is_err() {
                            tracing::warn!(
                                policy_id = %self.policy_id,
                                "follow-up job dropped: queue closed"
                            );
                        }
                    }
                    return;
                }
                Err(e) if e.is_retryable() && attempt < job.max_retries => {
                    tracing::warn!(
                        policy_id = %self.policy_id,
                        job_id = %job.job_id,
                        job_type = job.payload.job_type(),
                        attempt,
                        error = %e,
                        "job attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        policy_id = %self.policy_id,
                        job_id = %job.job_id,
                        job_type = job.payload.job_type(),
                        error = %e,
                        "job failed permanently"
                    );
                    return;
                }
            }
        }
    }
}
