//! Data-source registry
//!
//! Guards condition creation against stale product pricing: a condition's
//! cached cost components must agree with the live data source, tier and
//! category, and `calculated = base × tier × category` must hold.

use crate::domain::{DataSource, TriggerCondition};
use crate::error::{EngineError, EngineResult};
use crate::store::Stores;

const COST_EPSILON: f64 = 1e-9;

/// Registry resolving conditions to data sources with cost validation
pub struct DataSourceRegistry {
    stores: Stores,
}

impl DataSourceRegistry {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Resolve the condition's data source and validate its cached costs
    ///
    /// Fails with `CostMismatch` when any of base cost, tier multiplier,
    /// category multiplier or the calculated product disagrees with live
    /// catalog data. Also rejects `consecutive_required` on satellite
    /// sources: their 3-4 day revisit cadence can never satisfy a daily
    /// streak requirement.
    pub async fn resolve_and_validate(
        &self,
        condition: &TriggerCondition,
    ) -> EngineResult<DataSource> {
        condition.validate()?;

        let source = self
            .stores
            .data_sources
            .get_data_source(condition.data_source_id)
            .await?
            .ok_or_else(|| EngineError::not_found("DataSource", condition.data_source_id))?;
        let tier = self
            .stores
            .data_sources
            .get_tier(source.tier_id)
            .await?
            .ok_or_else(|| EngineError::not_found("DataTier", source.tier_id))?;
        let category = self
            .stores
            .data_sources
            .get_category(source.category_id)
            .await?
            .ok_or_else(|| EngineError::not_found("DataCategory", source.category_id))?;

        let mismatch = |field: &str, cached: f64, live: f64| EngineError::CostMismatch {
            condition_id: condition.id.to_string(),
            detail: format!("{} cached {} but live {}", field, cached, live),
        };

        let cost = &condition.cost;
        if (cost.base_cost - source.base_cost).abs() > COST_EPSILON {
            return Err(mismatch("base_cost", cost.base_cost, source.base_cost));
        }
        if (cost.tier_multiplier - tier.multiplier).abs() > COST_EPSILON {
            return Err(mismatch(
                "tier_multiplier",
                cost.tier_multiplier,
                tier.multiplier,
            ));
        }
        if (cost.category_multiplier - category.multiplier).abs() > COST_EPSILON {
            return Err(mismatch(
                "category_multiplier",
                cost.category_multiplier,
                category.multiplier,
            ));
        }
        let expected = source.base_cost * tier.multiplier * category.multiplier;
        if (cost.calculated_cost - expected).abs() > COST_EPSILON {
            return Err(mismatch("calculated_cost", cost.calculated_cost, expected));
        }

        if condition.consecutive_required && source.is_satellite() {
            return Err(EngineError::Validation(format!(
                "condition {} requires consecutive days on satellite source {}; \
                 satellite revisit cadence cannot satisfy daily streaks",
                condition.id, source.parameter_name
            )));
        }

        Ok(source)
    }

    /// API endpoint for a condition's data source
    pub async fn endpoint_for(&self, condition: &TriggerCondition) -> EngineResult<String> {
        let source = self
            .stores
            .data_sources
            .get_data_source(condition.data_source_id)
            .await?
            .ok_or_else(|| EngineError::not_found("DataSource", condition.data_source_id))?;
        Ok(source.api_endpoint)
    }
}
