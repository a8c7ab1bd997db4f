//! Engine assembly
//!
//! Wires stores, cache, fetch pipeline, claim generator, worker manager,
//! lifecycle services and the expiration bus into one running engine.

use crate::cache::TtlCache;
use crate::cancel_flow::CancelWorkflow;
use crate::claims::ClaimGenerator;
use crate::documents::{DocumentStore, NoopDocumentStore};
use crate::error::EngineResult;
use crate::expiration::ExpirationBus;
use crate::fetch::{FetchConfig, FetchPipeline};
use crate::lifecycle::PolicyLifecycle;
use crate::notify::{BestEffortNotifier, NoopNotifier, Notifier};
use crate::providers::ProviderClient;
use crate::registry::DataSourceRegistry;
use crate::renewal::RenewalOrchestrator;
use crate::risk::{NoopRiskAnalyzer, RiskAnalyzer};
use crate::store::Stores;
use crate::workers::{EngineJobRunner, WorkerManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// External collaborators and tuning for an engine instance
pub struct EngineOptions {
    pub notifier: Arc<dyn Notifier>,
    pub risk: Arc<dyn RiskAnalyzer>,
    pub documents: Arc<dyn DocumentStore>,
    pub fetch: FetchConfig,
    pub http_timeout: Duration,
    pub payment_window: Duration,
    pub notice_period: Duration,
    /// Duplicate-claim suppression window
    pub dedup_window: Duration,
    /// Time until a generated claim auto-approves
    pub auto_approval_window: Duration,
    pub notify_max_attempts: u32,
    pub notify_retry_spacing: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            notifier: Arc::new(NoopNotifier),
            risk: Arc::new(NoopRiskAnalyzer),
            documents: Arc::new(NoopDocumentStore),
            fetch: FetchConfig::default(),
            http_timeout: Duration::from_secs(30),
            payment_window: Duration::from_secs(7 * 24 * 3600),
            notice_period: Duration::from_secs(14 * 24 * 3600),
            dedup_window: Duration::from_secs(24 * 3600),
            auto_approval_window: Duration::from_secs(7 * 24 * 3600),
            notify_max_attempts: 30,
            notify_retry_spacing: Duration::from_secs(10),
        }
    }
}

impl EngineOptions {
    /// Options derived from the service configuration
    pub fn from_config(config: &agrisa_config::AgrisaConfig) -> Self {
        Self {
            fetch: FetchConfig {
                max_workers: config.engine.max_fetch_workers,
                ..FetchConfig::default()
            },
            http_timeout: Duration::from_secs(config.engine.http_timeout_secs),
            payment_window: Duration::from_secs(config.engine.payment_window_secs),
            notice_period: Duration::from_secs(config.engine.notice_period_secs),
            dedup_window: Duration::from_secs(
                config.engine.claim_dedup_hours.max(0) as u64 * 3600,
            ),
            auto_approval_window: Duration::from_secs(
                config.engine.auto_approval_days.max(0) as u64 * 24 * 3600,
            ),
            notify_max_attempts: config.notification.max_attempts,
            notify_retry_spacing: Duration::from_secs(config.notification.retry_spacing_secs),
            ..Self::default()
        }
    }
}

/// Assembled engine
pub struct Engine {
    pub stores: Stores,
    pub cache: Arc<TtlCache>,
    pub registry: Arc<DataSourceRegistry>,
    pub pipeline: Arc<FetchPipeline>,
    pub claims: Arc<ClaimGenerator>,
    pub workers: Arc<WorkerManager>,
    pub lifecycle: Arc<PolicyLifecycle>,
    pub renewal: Arc<RenewalOrchestrator>,
    pub cancel_flow: Arc<CancelWorkflow>,
    pub bus: Arc<ExpirationBus>,
}

impl Engine {
    /// Assemble an engine over the given stores
    ///
    /// Must be called within a tokio runtime: the cache sweeper starts
    /// immediately.
    pub fn build(stores: Stores, options: EngineOptions) -> EngineResult<Self> {
        let cache = TtlCache::new();
        let notifier = BestEffortNotifier::new(
            options.notifier,
            options.notify_max_attempts,
            options.notify_retry_spacing,
        );

        let claims = Arc::new(ClaimGenerator::new(
            stores.clone(),
            notifier.clone(),
            options.dedup_window,
            options.auto_approval_window,
        ));
        let client = Arc::new(ProviderClient::new(options.http_timeout)?);
        let pipeline = Arc::new(FetchPipeline::new(
            stores.clone(),
            client,
            Arc::clone(&claims),
            options.fetch,
        ));
        let runner = Arc::new(EngineJobRunner::new(Arc::clone(&pipeline), options.risk));
        let workers = Arc::new(WorkerManager::new(runner));

        let lifecycle = Arc::new(PolicyLifecycle::new(
            stores.clone(),
            Arc::clone(&workers),
            Arc::clone(&cache),
            notifier.clone(),
            options.payment_window,
        ));
        let renewal = Arc::new(RenewalOrchestrator::new(
            stores.clone(),
            Arc::clone(&workers),
            notifier.clone(),
        ));
        let cancel_flow = Arc::new(CancelWorkflow::new(
            stores.clone(),
            Arc::clone(&cache),
            Arc::clone(&workers),
            notifier,
            options.notice_period,
        ));
        let registry = Arc::new(DataSourceRegistry::new(stores.clone()));
        let bus = ExpirationBus::new(
            Arc::clone(&cache),
            stores.clone(),
            Arc::clone(&renewal),
            Arc::clone(&lifecycle),
            Arc::clone(&cancel_flow),
            options.documents,
        );

        Ok(Self {
            stores,
            cache,
            registry,
            pipeline,
            claims,
            workers,
            lifecycle,
            renewal,
            cancel_flow,
            bus,
        })
    }

    /// Start the expiration bus and recover workers for active policies
    pub async fn start(&self) -> EngineResult<JoinHandle<()>> {
        let bus_handle = Arc::clone(&self.bus).start();
        let recovered = self.workers.recover_active(&self.stores).await?;
        tracing::info!(recovered, "engine started");
        Ok(bus_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_builds_and_starts_empty() {
        let engine = Engine::build(Stores::in_memory(), EngineOptions::default()).unwrap();
        let handle = engine.start().await.unwrap();
        assert_eq!(engine.workers.worker_count(), 0);
        handle.abort();
    }
}
