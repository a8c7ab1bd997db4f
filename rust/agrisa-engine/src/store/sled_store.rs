//! Sled-backed durable store
//!
//! Entities are serialized as JSON under prefixed keys. Monitoring keys
//! embed a zero-padded timestamp so range scans come back ordered.

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
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Durable store over a sled database
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let db = sled::open(path)
            .map_err(|e| EngineError::Storage(format!("failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    fn put<T: Serialize>(&self, key: String, value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> EngineResult<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            values.push(serde_json::from_slice(&bytes)?);
        }
        Ok(values)
    }

    fn monitoring_key(farm: FarmId, parameter: &str, timestamp: i64) -> String {
        format!("monitoring:{}:{}:{:020}", farm, parameter, timestamp)
    }
}

#[async_trait]
impl BasePolicyStore for SledStore {
    async fn insert_base_policy(&self, policy: &BasePolicy) -> EngineResult<()> {
        self.put(format!("base_policy:{}", policy.id), policy)
    }

    async fn get_base_policy(&self, id: BasePolicyId) -> EngineResult<Option<BasePolicy>> {
        self.get(&format!("base_policy:{}", id))
    }

    async fn update_base_policy(&self, policy: &BasePolicy) -> EngineResult<()> {
        let key = format!("base_policy:{}", policy.id);
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(EngineError::not_found("BasePolicy", policy.id));
        }
        self.put(key, policy)
    }

    async fn insert_trigger(
        &self,
        trigger: &PolicyTrigger,
        conditions: &[TriggerCondition],
    ) -> EngineResult<()> {
        self.put(format!("trigger:{}", trigger.base_policy_id), trigger)?;
        for condition in conditions {
            self.put(
                format!("condition:{}:{}", trigger.id, condition.id),
                condition,
            )?;
        }
        Ok(())
    }

    async fn trigger_for(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<Option<PolicyTrigger>> {
        self.get(&format!("trigger:{}", base_policy_id))
    }

    async fn conditions_for(&self, trigger_id: TriggerId) -> EngineResult<Vec<TriggerCondition>> {
        let mut conditions: Vec<TriggerCondition> =
            self.scan(&format!("condition:{}:", trigger_id))?;
        conditions.sort_by_key(|c| c.condition_order);
        Ok(conditions)
    }

    async fn delete_trigger(&self, base_policy_id: BasePolicyId) -> EngineResult<()> {
        let key = format!("trigger:{}", base_policy_id);
        if let Some(trigger) = self.get::<PolicyTrigger>(&key)? {
            let prefix = format!("condition:{}:", trigger.id);
            let keys: Vec<_> = self
                .db
                .scan_prefix(prefix.as_bytes())
                .filter_map(|item| item.ok().map(|(k, _)| k))
                .collect();
            for k in keys {
                self.db.remove(k)?;
            }
            self.db.remove(key.as_bytes())?;
        }
        Ok(())
    }

    async fn delete_condition(&self, condition_id: ConditionId) -> EngineResult<()> {
        let keys: Vec<_> = self
            .db
            .scan_prefix(b"condition:")
            .filter_map(|item| item.ok().map(|(k, _)| k))
            .filter(|k| {
                String::from_utf8_lossy(k)
                    .rsplit(':')
                    .next()
                    .map_or(false, |suffix| suffix == condition_id.to_string())
            })
            .collect();
        for k in keys {
            self.db.remove(k)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RegisteredPolicyStore for SledStore {
    async fn insert_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()> {
        self.put(format!("policy:{}", policy.id), policy)
    }

    async fn get_policy(
        &self,
        id: RegisteredPolicyId,
    ) -> EngineResult<Option<RegisteredPolicy>> {
        self.get(&format!("policy:{}", id))
    }

    async fn update_policy(&self, policy: &RegisteredPolicy) -> EngineResult<()> {
        let key = format!("policy:{}", policy.id);
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(EngineError::not_found("RegisteredPolicy", policy.id));
        }
        self.put(key, policy)
    }

    async fn list_by_base_policy(
        &self,
        base_policy_id: BasePolicyId,
    ) -> EngineResult<Vec<RegisteredPolicy>> {
        let policies: Vec<RegisteredPolicy> = self.scan("policy:")?;
        Ok(policies
            .into_iter()
            .filter(|p| p.base_policy_id == base_policy_id)
            .collect())
    }

    async fn list_active(&self) -> EngineResult<Vec<RegisteredPolicy>> {
        let policies: Vec<RegisteredPolicy> = self.scan("policy:")?;
        Ok(policies
            .into_iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .collect())
    }
}

#[async_trait]
impl FarmStore for SledStore {
    async fn insert_farm(&self, farm: &Farm) -> EngineResult<()> {
        self.put(format!("farm:{}", farm.id), farm)
    }

    async fn get_farm(&self, id: FarmId) -> EngineResult<Option<Farm>> {
        self.get(&format!("farm:{}", id))
    }

    async fn update_polygon_id(&self, id: FarmId, polygon_id: &str) -> EngineResult<()> {
        let key = format!("farm:{}", id);
        let mut farm: Farm = self
            .get(&key)?
            .ok_or_else(|| EngineError::not_found("Farm", id))?;
        farm.provider_polygon_id = Some(polygon_id.to_string());
        self.put(key, &farm)
    }
}

#[async_trait]
impl DataSourceStore for SledStore {
    async fn insert_data_source(&self, source: &DataSource) -> EngineResult<()> {
        self.put(format!("datasource:{}", source.id), source)
    }

    async fn get_data_source(&self, id: DataSourceId) -> EngineResult<Option<DataSource>> {
        self.get(&format!("datasource:{}", id))
    }

    async fn insert_tier(&self, tier: &DataTier) -> EngineResult<()> {
        self.put(format!("tier:{}", tier.id), tier)
    }

    async fn get_tier(&self, id: TierId) -> EngineResult<Option<DataTier>> {
        self.get(&format!("tier:{}", id))
    }

    async fn insert_category(&self, category: &DataCategory) -> EngineResult<()> {
        self.put(format!("category:{}", category.id), category)
    }

    async fn get_category(&self, id: CategoryId) -> EngineResult<Option<DataCategory>> {
        self.get(&format!("category:{}", id))
    }
}

#[async_trait]
impl MonitoringStore for SledStore {
    async fn create_batch(&self, records: &[FarmMonitoringData]) -> EngineResult<usize> {
        let mut inserted = 0;
        for record in records {
            let key =
                Self::monitoring_key(record.farm_id, &record.parameter_name, record.timestamp);
            let bytes = serde_json::to_vec(record)?;
            // Insert-if-absent keeps the batch idempotent under replays
            let swapped = self
                .db
                .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
            if swapped.is_ok() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn latest_timestamp(&self, farm: FarmId, parameter: &str) -> EngineResult<i64> {
        let prefix = format!("monitoring:{}:{}:", farm, parameter);
        let mut latest = 0;
        if let Some(item) = self.db.scan_prefix(prefix.as_bytes()).last() {
            let (_, bytes) = item?;
            let record: FarmMonitoringData = serde_json::from_slice(&bytes)?;
            latest = record.timestamp;
        }
        Ok(latest)
    }

    async fn get_by_time_range(
        &self,
        farm: FarmId,
        start: i64,
        end: i64,
    ) -> EngineResult<Vec<FarmMonitoringData>> {
        let records: Vec<FarmMonitoringData> = self.scan(&format!("monitoring:{}:", farm))?;
        let mut records: Vec<_> = records
            .into_iter()
            .filter(|r| (start..=end).contains(&r.timestamp))
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
        let records: Vec<FarmMonitoringData> =
            self.scan(&format!("monitoring:{}:{}:", farm, parameter))?;
        Ok(records
            .into_iter()
            .filter(|r| {
                start.map_or(true, |s| r.timestamp >= s) && end.map_or(true, |t| r.timestamp <= t)
            })
            .collect())
    }
}

#[async_trait]
impl ClaimStore for SledStore {
    async fn insert_claim(&self, claim: &Claim) -> EngineResult<()> {
        self.put(format!("claim:{}", claim.id), claim)
    }

    async fn get_claim(&self, id: ClaimId) -> EngineResult<Option<Claim>> {
        self.get(&format!("claim:{}", id))
    }

    async fn update_claim(&self, claim: &Claim) -> EngineResult<()> {
        let key = format!("claim:{}", claim.id);
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(EngineError::not_found("Claim", claim.id));
        }
        self.put(key, claim)
    }

    async fn recent_for_trigger(
        &self,
        policy_id: RegisteredPolicyId,
        trigger_id: TriggerId,
        since: i64,
    ) -> EngineResult<Option<Claim>> {
        let claims: Vec<Claim> = self.scan("claim:")?;
        Ok(claims
            .into_iter()
            .filter(|c| {
                c.registered_policy_id == policy_id
                    && c.trigger_id == trigger_id
                    && c.created_at >= since
            })
            .max_by_key(|c| c.created_at))
    }

    async fn has_pending_partner_review(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<bool> {
        let claims: Vec<Claim> = self.scan("claim:")?;
        Ok(claims.iter().any(|c| {
            c.registered_policy_id == policy_id && c.status == ClaimStatus::PendingPartnerReview
        }))
    }
}

#[async_trait]
impl CancelRequestStore for SledStore {
    async fn insert_request(&self, request: &CancelRequest) -> EngineResult<()> {
        self.put(format!("cancel:{}", request.id), request)
    }

    async fn get_request(&self, id: CancelRequestId) -> EngineResult<Option<CancelRequest>> {
        self.get(&format!("cancel:{}", id))
    }

    async fn update_request(&self, request: &CancelRequest) -> EngineResult<()> {
        let key = format!("cancel:{}", request.id);
        if self.db.get(key.as_bytes())?.is_none() {
            return Err(EngineError::not_found("CancelRequest", request.id));
        }
        self.put(key, request)
    }

    async fn list_by_policy(
        &self,
        policy_id: RegisteredPolicyId,
    ) -> EngineResult<Vec<CancelRequest>> {
        let requests: Vec<CancelRequest> = self.scan("cancel:")?;
        Ok(requests
            .into_iter()
            .filter(|r| r.policy_id == policy_id)
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
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(farm: FarmId, ts: i64) -> FarmMonitoringData {
        FarmMonitoringData {
            id: Uuid::new_v4(),
            farm_id: farm,
            condition_id: ConditionId::new(),
            parameter_name: "RainFall".to_string(),
            value: 0.5,
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
    async fn test_monitoring_batch_idempotent_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let farm = FarmId::new();

        let batch = vec![record(farm, 200), record(farm, 100)];
        assert_eq!(store.create_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.create_batch(&batch).await.unwrap(), 0);

        assert_eq!(store.latest_timestamp(farm, "RainFall").await.unwrap(), 200);
        let all = store
            .get_by_farm_and_parameter(farm, "RainFall", None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].timestamp < all[1].timestamp);
    }

    #[tokio::test]
    async fn test_base_policy_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let policy = BasePolicy {
            id: BasePolicyId::new(),
            provider_id: crate::domain::ProviderId::new(),
            product_name: "Flood Guard".to_string(),
            crop_type: "rice".to_string(),
            currency: "USD".to_string(),
            coverage_duration_days: 90,
            fix_premium_amount: 10.0,
            premium_base_rate: 0.02,
            fix_payout_amount: 100.0,
            payout_base_rate: 1.0,
            over_threshold_multiplier: 10.0,
            payout_cap: None,
            per_hectare: false,
            enrollment_start_day: 1,
            enrollment_end_day: 15,
            validity: crate::domain::ValidityWindow {
                from_day: 1,
                to_day: 90,
            },
            document_tags: Default::default(),
            auto_renewal: false,
            renewal_discount_rate: 0.0,
            status: crate::domain::BasePolicyStatus::Active,
            document_validation: crate::domain::DocumentValidationStatus::Passed,
        };
        store.insert_base_policy(&policy).await.unwrap();
        let loaded = store.get_base_policy(policy.id).await.unwrap().unwrap();
        assert_eq!(loaded.product_name, "Flood Guard");

        let missing = store
            .get_base_policy(BasePolicyId::new())
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
