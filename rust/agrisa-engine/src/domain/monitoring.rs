//! Farm monitoring timeseries records

use crate::domain::ids::{ConditionId, FarmId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Quality classification of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    Good,
    Acceptable,
    Poor,
}

/// One measurement over a farm's boundary
///
/// Records are append-only; (farm, parameter, timestamp) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmMonitoringData {
    /// Record identity, used to dedupe merged historical and fetched sets
    pub id: Uuid,
    pub farm_id: FarmId,
    pub condition_id: ConditionId,
    pub parameter_name: String,
    pub value: f64,
    pub unit: String,
    /// Measurement time, unix seconds
    pub timestamp: i64,
    /// Raw per-source extras, e.g. satellite band statistics
    pub component_data: BTreeMap<String, serde_json::Value>,
    pub data_quality: DataQuality,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    pub source: String,
    pub cloud_cover: Option<f64>,
}

impl FarmMonitoringData {
    /// Uniqueness key for idempotent batch insertion
    pub fn dedup_key(&self) -> (FarmId, &str, i64) {
        (self.farm_id, self.parameter_name.as_str(), self.timestamp)
    }
}
