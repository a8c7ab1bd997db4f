//! Shared fixtures for integration tests
#![allow(dead_code)]

use agrisa_engine::domain::*;
use agrisa_engine::notify::{NotificationEvent, Notifier};
use agrisa_engine::store::Stores;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Notifier that records every delivered event
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: parking_lot::Mutex<Vec<NotificationEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) -> agrisa_engine::EngineResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count_cancelled(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, NotificationEvent::PolicyCancelled { .. }))
            .count()
    }
}

pub fn base_policy(auto_renewal: bool, discount: f64) -> BasePolicy {
    BasePolicy {
        id: BasePolicyId::new(),
        provider_id: ProviderId::new(),
        product_name: "Drought Shield".to_string(),
        crop_type: "maize".to_string(),
        currency: "USD".to_string(),
        coverage_duration_days: 120,
        fix_premium_amount: 50.0,
        premium_base_rate: 0.05,
        fix_payout_amount: 500.0,
        payout_base_rate: 1.0,
        over_threshold_multiplier: 100.0,
        payout_cap: Some(5_000.0),
        per_hectare: false,
        enrollment_start_day: 1,
        enrollment_end_day: 30,
        validity: ValidityWindow {
            from_day: 1,
            to_day: 120,
        },
        document_tags: Default::default(),
        auto_renewal,
        renewal_discount_rate: discount,
        status: BasePolicyStatus::Active,
        document_validation: DocumentValidationStatus::Passed,
    }
}

pub fn farm() -> Farm {
    Farm {
        id: FarmId::new(),
        owner: FarmerId::new(),
        name: "North Field".to_string(),
        boundary: FarmBoundary {
            kind: "Polygon".to_string(),
            coordinates: vec![vec![
                [105.80, 21.02],
                [105.81, 21.02],
                [105.81, 21.03],
                [105.80, 21.03],
                [105.80, 21.02],
            ]],
        },
        area_hectares: 4.5,
        provider_polygon_id: None,
    }
}

pub fn registered_policy(
    base: &BasePolicy,
    farm: &Farm,
    status: PolicyStatus,
) -> RegisteredPolicy {
    RegisteredPolicy {
        id: RegisteredPolicyId::new(),
        base_policy_id: base.id,
        farm_id: farm.id,
        farmer_id: farm.owner,
        provider_id: base.provider_id,
        policy_number: generate_policy_number(),
        coverage_start: if status == PolicyStatus::Active {
            1_600_000_000
        } else {
            0
        },
        coverage_end: i64::from(base.validity.to_day),
        total_farmer_premium: 1_000.0,
        total_data_cost: 100.0,
        coverage_amount: 10_000.0,
        underwriting_status: if status == PolicyStatus::PendingReview {
            UnderwritingStatus::Pending
        } else {
            UnderwritingStatus::Approved
        },
        status,
        signed_document_url: None,
        premium_paid_at: None,
        created_at: 1_600_000_000,
    }
}

pub fn weather_trigger(base: &BasePolicy, conditions: &mut Vec<TriggerCondition>) -> PolicyTrigger {
    let trigger = PolicyTrigger {
        id: TriggerId::new(),
        base_policy_id: base.id,
        logical_operator: LogicalOperator::And,
        monitor_interval: 1,
        interval_unit: IntervalUnit::Day,
        blackout_periods: vec![],
    };
    for condition in conditions.iter_mut() {
        condition.trigger_id = trigger.id;
    }
    trigger
}

pub fn drought_condition(source: DataSourceId) -> TriggerCondition {
    TriggerCondition {
        id: ConditionId::new(),
        trigger_id: TriggerId::new(),
        condition_order: 0,
        data_source_id: source,
        threshold_value: 1.0,
        threshold_operator: ThresholdOperator::Lt,
        aggregate_function: AggregateFunction::Avg,
        aggregation_window_days: 10,
        validation_window_days: 5,
        consecutive_required: true,
        baseline_window_days: None,
        baseline_function: None,
        early_warning_threshold: None,
        cost: ConditionCost {
            base_cost: 10.0,
            tier_multiplier: 1.0,
            category_multiplier: 1.0,
            calculated_cost: 10.0,
        },
    }
}

pub async fn seed_weather_source(stores: &Stores, endpoint: &str) -> DataSource {
    let tier = DataTier {
        id: TierId::new(),
        name: "standard".to_string(),
        multiplier: 1.0,
    };
    let category = DataCategory {
        id: CategoryId::new(),
        name: "weather".to_string(),
        multiplier: 1.0,
    };
    let source = DataSource {
        id: DataSourceId::new(),
        parameter_name: "RainFall".to_string(),
        provider: "meteo".to_string(),
        tier_id: tier.id,
        category_id: category.id,
        unit: "mm".to_string(),
        base_cost: 10.0,
        active: true,
        api_endpoint: endpoint.to_string(),
        accuracy_rating: 0.95,
    };
    stores.data_sources.insert_tier(&tier).await.unwrap();
    stores
        .data_sources
        .insert_category(&category)
        .await
        .unwrap();
    stores
        .data_sources
        .insert_data_source(&source)
        .await
        .unwrap();
    source
}

pub fn rainfall_record(
    farm_id: FarmId,
    condition_id: ConditionId,
    timestamp: i64,
    value: f64,
) -> FarmMonitoringData {
    FarmMonitoringData {
        id: Uuid::new_v4(),
        farm_id,
        condition_id,
        parameter_name: "RainFall".to_string(),
        value,
        unit: "mm".to_string(),
        timestamp,
        component_data: BTreeMap::new(),
        data_quality: DataQuality::Good,
        confidence_score: 1.0,
        source: "meteo".to_string(),
        cloud_cover: None,
    }
}
