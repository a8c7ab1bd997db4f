//! Repository traits and store implementations
//!
//! The engine talks to persistence through these traits only. Two
//! implementations ship with the crate: an in-memory store for tests and
//! a sled-backed durable store used by the service binary. A relational
//! backend can be slotted in by implementing the same traits.

pub mod memory;
pub mod sled_store;

use crate::domain::{
    BasePolicy, BasePolicyId, CancelRequest, CancelRequestId, CancelRequestType, CategoryId,
    Claim, ClaimId, ConditionId, DataCategory, DataSource, DataSourceId, DataTier, Farm,
    FarmId, FarmMonitoringData, Party, PolicyTrigger, RegisteredPolicy, RegisteredPolicyId,
    TierId, TriggerCondition, TriggerId,
};
use crate::error::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Base policy templates, their triggers and conditions
#[async_trait]
pub trait BasePolicyStore: Send + Sync {
    async fn insert_base_policy(&self, policy: &BasePolicy) -> EngineResult<()>;
    async fn get_base_policy(&self, id: BasePolicyId) -> EngineResult<Option<BasePolicy>>;
    async fn update_base_policy(&self, policy: &BasePolicy) -> EngineResult<()>;

    /// Insert the trigger together with its conditions
    async fn insert_trigger(
        &self,
        trigger: &PolicyTrigger,
        conditions: &[TriggerCondition],
    ) -> EngineResult<()>;
    async fn trigger_for(&self, base_policy_id: BasePolicyId)
        -> EngineResult<Option<PolicyTrigger>>;
    /// Conditions sorted by condition_order
    async fn conditions_for(&self, trigger_id: TriggerId) -> EngineResult<Vec<TriggerCondition>>;
    /// Cascade-delete the trigger and its conditions
    async fn delete_trigger(&self, base_policy_id: BasePolicyId) -> EngineResult<()>;
    async fn delete_condition(&self, condition_id: ConditionId) -> EngineResult<()>;
}

/// Registered policy instances
#[async_trait]
pub trait RegisteredPolicyStore: Send + Sync {
    async fn insert_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()>;
    async fn get_policy(&self, id: RegisteredPolicyId) -> EngineResult<Option<RegisteredPolicy>>;
    async fn update_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()>;
    async fn list_by_base_policy(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<Vec<RegisteredPolicy>>;
    /// Policies in Active status, used for post-restart worker recovery
    async fn list_active(&self) -> EngineResult<Vec<RegisteredPolicy>>;
}

/// Farms and their boundaries
#[async_trait]
pub trait FarmStore: Send + Sync {
    async fn insert_farm(&self, farm: &Farm) -> EngineResult<()>;
    async fn get_farm(&self, id: FarmId) -> EngineResult<Option<Farm>>;
    /// Best-effort write-back of the weather provider's polygon id
    async fn update_polygon_id(&self, id: FarmId, polygon_id: &str) -> EngineResult<()>;
}

/// Data source catalog with pricing tiers and categories
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    async fn insert_data_source(&self, source: &DataSource) -> EngineResult<()>;
    async fn get_data_source(&self, id: DataSourceId) -> EngineResult<Option<DataSource>>;
    async fn insert_tier(&self, tier: &DataTier) -> EngineResult<()>;
    async fn get_tier(&self, id: TierId) -> EngineResult<Option<DataTier>>;
    async fn insert_category(&self, category: &DataCategory) -> EngineResult<()>;
    async fn get_category(&self, id: CategoryId) -> EngineResult<Option<DataCategory>>;
}

/// Append-only monitoring timeseries keyed by (farm, parameter)
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    /// Idempotent batch insert; conflicts on (farm, parameter, timestamp)
    /// are ignored. Returns the number of records actually inserted.
    async fn create_batch(&self, records: &[FarmMonitoringData]) -> EngineResult<usize>;
    /// Latest measurement timestamp for (farm, parameter); 0 if none
    async fn latest_timestamp(&self, farm: FarmId, parameter: &str) -> EngineResult<i64>;
    /// All records for a farm in [start, end], any parameter
    async fn get_by_time_range(
        &self,
        farm: FarmId,
        start: i64,
        end: i64,
    ) -> EngineResult<Vec<FarmMonitoringData>>;
    async fn get_by_farm_and_parameter(
        &self,
        farm: FarmId,
        parameter: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> EngineResult<Vec<FarmMonitoringData>>;
}

/// Claims
#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn insert_claim(&self, claim: &Claim) -> EngineResult<()>;
    async fn get_claim(&self, id: ClaimId) -> EngineResult<Option<Claim>>;
    async fn update_claim(&self, claim: &Claim) -> EngineResult<()>;
    /// Most recent claim for (policy, trigger) created at or after `since`
    async fn recent_for_trigger(
        &self,
        policy_id: RegisteredPolicyId,
        trigger_id: TriggerId,
        since: i64,
    ) -> EngineResult<Option<Claim>>;
    /// Whether any claim on the policy awaits partner review
    async fn has_pending_partner_review(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<bool>;
}

/// Cancel requests and compensation computation
#[async_trait]
pub trait CancelRequestStore: Send + Sync {
    async fn insert_request(&self, request: &CancelRequest) -> EngineResult<()>;
    async fn get_request(&self, id: CancelRequestId) -> EngineResult<Option<CancelRequest>>;
    async fn update_request(&self, request: &CancelRequest) -> EngineResult<()>;
    async fn list_by_policy(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<Vec<CancelRequest>>;
    /// Compensation owed if the given party cancels the policy now
    async fn compensation_amount(
        &self,
        policy: &RegisteredPolicy,
        base_policy: &BasePolicy,
        requested_by: &Party,
        kind: CancelRequestType,
        now: i64,
    ) -> EngineResult<f64>;
}

/// Bundle of repository handles shared across engine components
#[derive(Clone)]
pub struct Stores {
    pub base_policies: Arc<dyn BasePolicyStore>,
    pub policies: Arc<dyn RegisteredPolicyStore>,
    pub farms: Arc<dyn FarmStore>,
    pub data_sources: Arc<dyn DataSourceStore>,
    pub monitoring: Arc<dyn MonitoringStore>,
    pub claims: Arc<dyn ClaimStore>,
    pub cancels: Arc<dyn CancelRequestStore>,
}

impl Stores {
    /// All repositories backed by one in-memory store
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            base_policies: store.clone(),
            policies: store.clone(),
            farms: store.clone(),
            data_sources: store.clone(),
            monitoring: store.clone(),
            claims: store.clone(),
            cancels: store,
        }
    }

    /// All repositories backed by one sled database
    pub fn sled(db: sled::Db) -> Self {
        let store = Arc::new(SledStore::new(db));
        Self {
            base_policies: store.clone(),
            policies: store.clone(),
            farms: store.clone(),
            data_sources: store.clone(),
            monitoring: store.clone(),
            claims: store.clone(),
            cancels: store,
        }
    }
}

/// Pro-rata compensation shared by both store implementations
///
/// Pre-active policies refund the full premium; active policies refund
/// the unelapsed fraction of the coverage duration. Transfer-contract
/// requests carry no compensation (the policy moves, it does not end).
pub(crate) fn prorated_compensation(
    policy: &RegisteredPolicy,
    base_policy: &BasePolicy,
    kind: CancelRequestType,
    now: i64,
) -> f64 {
    if kind == CancelRequestType::TransferContract {
        return 0.0;
    }
    if policy.coverage_start == 0 {
        return policy.total_farmer_premium;
    }
    let total = i64::from(base_policy.coverage_duration_days) * 86_400;
    if total <= 0 {
        return 0.0;
    }
    let elapsed = now.saturating_sub(policy.coverage_start).max(0).min(total);
    policy.total_farmer_premium * (total - elapsed) as f64 / total as f64
}
