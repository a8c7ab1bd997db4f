//! In-memory store used by tests and as a reference implementation

use crate::domain::{
    BasePolicy, BasePolicyId, CancelRequest, CancelRequestId, CancelRequestType, CategoryId,
    Claim, ClaimId, ClaimStatus, ConditionId, DataCategory, DataSource, DataSourceId, DataTier,
    Farm, FarmId, FarmMonitoringData, Party, PolicyStatus, PolicyTrigger, RegisteredPolicy,
    RegisteredPolicyId, TierId, TriggerCondition, TriggerId,
};
use crate::error::{EngineError, EngineResult};
use crate::store::{
    prorated_compensation, BasePolicyStore, CancelRequestStore, ClaimStore, DataSourceStore,
    FarmStore, MonitoringStore, RegisteredPolicyStore,
};
use async_trait::async_trait;
use dashmap::DashMap;

/// DashMap-backed implementation of every repository trait
#[derive(Default)]
pub struct MemoryStore {
    base_policies: DashMap<BasePolicyId, BasePolicy>,
    triggers: DashMap<BasePolicyId, PolicyTrigger>,
    conditions: DashMap<TriggerId, Vec<TriggerCondition>>,
    policies: DashMap<RegisteredPolicyId, RegisteredPolicy>,
    farms: DashMap<FarmId, Farm>,
    data_sources: DashMap<DataSourceId, DataSource>,
    tiers: DashMap<TierId, DataTier>,
    categories: DashMap<CategoryId, DataCategory>,
    /// Keyed by (farm, parameter, timestamp) for idempotent inserts
    monitoring: DashMap<(FarmId, String, i64), FarmMonitoringData>,
    claims: DashMap<ClaimId, Claim>,
    cancels: DashMap<CancelRequestId, CancelRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BasePolicyStore for MemoryStore {
    async fn insert_base_policy(&self, policy: &BasePolicy) -> EngineResult<()> {
        self.base_policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_base_policy(&self, id: BasePolicyId) -> EngineResult<Option<BasePolicy>> {
        Ok(self.base_policies.get(&id).map(|p| p.clone()))
    }

    async fn update_base_policy(&self, policy: &BasePolicy) -> EngineResult<()> {
        if !self.base_policies.contains_key(&policy.id) {
            return Err(EngineError::not_found("BasePolicy", policy.id));
        }
        self.base_policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn insert_trigger(
        &self,
        trigger: &PolicyTrigger,
        conditions: &[TriggerCondition],
    ) -> EngineResult<()> {
        self.triggers.insert(trigger.base_policy_id, trigger.clone());
        self.conditions.insert(trigger.id, conditions.to_vec());
        Ok(())
    }

    async fn trigger_for(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<Option<PolicyTrigger>> {
        Ok(self.triggers.get(&base_policy_id).map(|t| t.clone()))
    }

    async fn conditions_for(&self, trigger_id: TriggerId) -> EngineResult<Vec<TriggerCondition>> {
        let mut conditions = self
            .conditions
            .get(&trigger_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        conditions.sort_by_key(|c| c.condition_order);
        Ok(conditions)
    }

    async fn delete_trigger(&self, base_policy_id: BasePolicyId) -> EngineResult<()> {
        if let Some((_, trigger)) = self.triggers.remove(&base_policy_id) {
            self.conditions.remove(&trigger.id);
        }
        Ok(())
    }

    async fn delete_condition(&self, condition_id: ConditionId) -> EngineResult<()> {
        for mut entry in self.conditions.iter_mut() {
            entry.value_mut().retain(|c| c.id != condition_id);
        }
        Ok(())
    }
}

#[async_trait]
impl RegisteredPolicyStore for MemoryStore {
    async fn insert_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()> {
        self.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_policy(
        &self,
        id: RegisteredPolicyId,
    ) -> EngineResult<Option<RegisteredPolicy>> {
        Ok(self.policies.get(&id).map(|p| p.clone()))
    }

    async fn update_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()> {
        if !self.policies.contains_key(&policy.id) {
            return Err(EngineError::not_found("RegisteredPolicy", policy.id));
        }
        self.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn list_by_base_policy(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<Vec<RegisteredPolicy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.base_policy_id == base_policy_id)
            .map(|p| p.clone())
            .collect())
    }

    async fn list_active(&self) -> EngineResult<Vec<RegisteredPolicy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .map(|p| p.clone())
            .collect())
    }
}

#[async_trait]
impl FarmStore for MemoryStore {
    async fn insert_farm(&self, farm: &Farm) -> EngineResult<()> {
        self.farms.insert(farm.id, farm.clone());
        Ok(())
    }

    async fn get_farm(&self, id: FarmId) -> EngineResult<Option<Farm>> {
        Ok(self.farms.get(&id).map(|f| f.clone()))
    }

    async fn update_polygon_id(&self, id: FarmId, polygon_id: &str) -> EngineResult<()> {
        match self.farms.get_mut(&id) {
            Some(mut farm) => {
                farm.provider_polygon_id = Some(polygon_id.to_string());
                Ok(())
            }
            None => Err(EngineError::not_found("Farm", id)),
        }
    }
}

#[async_trait]
impl DataSourceStore for MemoryStore {
    async fn insert_data_source(&self, source: &DataSource) -> EngineResult<()> {
        self.data_sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn get_data_source(&self, id: DataSourceId) -> EngineResult<Option<DataSource>> {
        Ok(self.data_sources.get(&id).map(|s| s.clone()))
    }

    async fn insert_tier(&self, tier: &DataTier) -> EngineResult<()> {
        self.tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    async fn get_tier(&self, id: TierId) -> EngineResult<Option<DataTier>> {
        Ok(self.tiers.get(&id).map(|t| t.clone()))
    }

    async fn insert_category(&self, category: &DataCategory) -> EngineResult<()> {
        self.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn get_category(&self, id: CategoryId) -> EngineResult<Option<DataCategory>> {
        Ok(self.categories.get(&id).map(|c| c.clone()))
    }
}

#[async_trait]
impl MonitoringStore for MemoryStore {
    async fn create_batch(&self, records: &[FarmMonitoringData]) -> EngineResult<usize> {
        let mut inserted = 0;
        for record in records {
            let key = (
                record.farm_id,
                record.parameter_name.clone(),
                record.timestamp,
            );
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.monitoring.entry(key) {
                slot.insert(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn latest_timestamp(&self, farm: FarmId, parameter: &str) -> EngineResult<i64> {
        Ok(self
            .monitoring
            .iter()
            .filter(|e| e.key().0 == farm && e.key().1 == parameter)
            .map(|e| e.key().2)
            .max()
            .unwrap_or(0))
    }

    async fn get_by_time_range(
        &self,
        farm: FarmId,
        start: i64,
        end: i64,
    ) -> EngineResult<Vec<FarmMonitoringData>> {
        let mut records: Vec<_> = self
            .monitoring
            .iter()
            .filter(|e| e.key().0 == farm && (start..=end).contains(&e.key().2))
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn get_by_farm_and_parameter(
        &self,
        farm: FarmId,
        parameter: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> EngineResult<Vec<FarmMonitoringData>> {
        let mut records: Vec<_> = self
            .monitoring
            .iter()
            .filter(|e| {
                e.key().0 == farm
                    && e.key().1 == parameter
                    && start.map_or(true, |s| e.key().2 >= s)
                    && end.map_or(true, |t| e.key().2 <= t)
            })
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn insert_claim(&self, claim: &Claim) -> EngineResult<()> {
        self.claims.insert(claim.id, claim.clone());
        Ok(())
    }

    async fn get_claim(&self, id: ClaimId) -> EngineResult<Option<Claim>> {
        Ok(self.claims.get(&id).map(|c| c.clone()))
    }

    async fn update_claim(&self, claim: &Claim) -> EngineResult<()> {
        if !self.claims.contains_key(&claim.id) {
            return Err(EngineError::not_found("Claim", claim.id));
        }
        self.claims.insert(claim.id, claim.clone());
        Ok(())
    }

    async fn recent_for_trigger(
        &self,
        policy_id: RegisteredPolicyId,
        trigger_id: TriggerId,
        since: i64,
    ) -> EngineResult<Option<Claim>> {
        Ok(self
            .claims
            .iter()
            .filter(|c| {
                c.registered_policy_id == policy_id
                    && c.trigger_id == trigger_id
                    && c.created_at >= since
            })
            .max_by_key(|c| c.created_at)
            .map(|c| c.clone()))
    }

    async fn has_pending_partner_review(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<bool> {
        Ok(self.claims.iter().any(|c| {
            c.registered_policy_id == policy_id && c.status == ClaimStatus::PendingPartnerReview
        }))
    }
}

#[async_trait]
impl CancelRequestStore for MemoryStore {
    async fn insert_request(&self, request: &CancelRequest) -> EngineResult<()> {
        self.cancels.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: CancelRequestId) -> EngineResult<Option<CancelRequest>> {
        Ok(self.cancels.get(&id).map(|r| r.clone()))
    }

    async fn update_request(&self, request: &CancelRequest) -> EngineResult<()> {
        if !self.cancels.contains_key(&request.id) {
            return Err(EngineError::not_found("CancelRequest", request.id));
        }
        self.cancels.insert(request.id, request.clone());
        Ok(())
    }

    async fn list_by_policy(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<Vec<CancelRequest>> {
        Ok(self
            .cancels
            .iter()
            .filter(|r| r.policy_id == policy_id)
            .map(|r| r.clone())
            .collect())
    }

    async fn compensation_amount(
        &self,
        policy: &RegisteredPolicy,
        base_policy: &BasePolicy,
        _requested_by: &Party,
        kind: CancelRequestType,
        now: i64,
    ) -> EngineResult<f64> {
        Ok(prorated_compensation(policy, base_policy, kind, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DataQuality;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn record(farm: FarmId, parameter: &str, ts: i64, value: f64) -> FarmMonitoringData {
        FarmMonitoringData {
            id: Uuid::new_v4(),
            farm_id: farm,
            condition_id: ConditionId::new(),
            parameter_name: parameter.to_string(),
            value,
            unit: "mm".to_string(),
            timestamp: ts,
            component_data: BTreeMap::new(),
            data_quality: DataQuality::Good,
            confidence_score: 1.0,
            source: "weather".to_string(),
            cloud_cover: None,
        }
    }

    #[tokio::test]
    async fn test_create_batch_is_idempotent() {
        let store = MemoryStore::new();
        let farm = FarmId::new();
        let batch = vec![
            record(farm, "RainFall", 100, 0.5),
            record(farm, "RainFall", 200, 0.7),
        ];

        assert_eq!(store.create_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.create_batch(&batch).await.unwrap(), 0);
        let all = store
            .get_by_farm_and_parameter(farm, "RainFall", None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_timestamp_defaults_to_zero() {
        let store = MemoryStore::new();
        let farm = FarmId::new();
        assert_eq!(store.latest_timestamp(farm, "NDVI").await.unwrap(), 0);

        store
            .create_batch(&[record(farm, "NDVI", 300, 0.6)])
            .await
            .unwrap();
        assert_eq!(store.latest_timestamp(farm, "NDVI").await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_time_range_query_sorted() {
        let store = MemoryStore::new();
        let farm = FarmId::new();
        store
            .create_batch(&[
                record(farm, "RainFall", 300, 0.3),
                record(farm, "RainFall", 100, 0.1),
                record(farm, "NDVI", 200, 0.2),
            ])
            .await
            .unwrap();

        let ranged = store.get_by_time_range(farm, 100, 250).await.unwrap();
        assert_eq!(ranged.len(), 2);
        assert!(ranged[0].timestamp <= ranged[1].timestamp);
    }

    #[tokio::test]
    async fn test_conditions_sorted_by_order() {
        let store = MemoryStore::new();
        let trigger = PolicyTrigger {
            id: TriggerId::new(),
            base_policy_id: BasePolicyId::new(),
            logical_operator: crate::domain::LogicalOperator::And,
            monitor_interval: 1,
            interval_unit: crate::domain::IntervalUnit::Day,
            blackout_periods: vec![],
        };
        let condition = |order| TriggerCondition {
            id: ConditionId::new(),
            trigger_id: trigger.id,
            condition_order: order,
            data_source_id: DataSourceId::new(),
            threshold_value: 1.0,
            threshold_operator: crate::domain::ThresholdOperator::Lt,
            aggregate_function: crate::domain::AggregateFunction::Avg,
            aggregation_window_days: 5,
            validation_window_days: 5,
            consecutive_required: false,
            baseline_window_days: None,
            baseline_function: None,
            early_warning_threshold: None,
            cost: crate::domain::ConditionCost {
                base_cost: 1.0,
                tier_multiplier: 1.0,
                category_multiplier: 1.0,
                calculated_cost: 1.0,
            },
        };
        store
            .insert_trigger(&trigger, &[condition(2), condition(0), condition(1)])
            .await
            .unwrap();

        let conditions = store.conditions_for(trigger.id).await.unwrap();
        let orders: Vec<u32> = conditions.iter().map(|c| c.condition_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }
}
