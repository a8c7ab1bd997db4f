//! Weather provider response shapes and measurement mapping

use crate::domain::{ConditionId, DataQuality, FarmId, FarmMonitoringData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Top-level weather provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherResponse {
    #[serde(default)]
    pub polygon_id: Option<String>,
    #[serde(default)]
    pub polygon_area: f64,
    pub time_range: TimeRange,
    pub data: Vec<WeatherBucket>,
    #[serde(default)]
    pub total_data_value: f64,
    #[serde(default)]
    pub data_point_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// One aggregated weather bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherBucket {
    /// Bucket time, unix seconds
    pub dt: i64,
    /// Aggregated value for the bucket
    pub data: f64,
    /// Number of raw measurements in the bucket
    pub count: u32,
    pub unit: String,
}

fn quality_from_count(count: u32) -> DataQuality {
    if count < 5 {
        DataQuality::Poor
    } else if count < 10 {
        DataQuality::Acceptable
    } else {
        DataQuality::Good
    }
}

/// Convert a weather response into canonical measurements, one per bucket
pub fn to_measurements(
    response: &WeatherResponse,
    farm_id: FarmId,
    condition_id: ConditionId,
    parameter_name: &str,
    source: &str,
) -> Vec<FarmMonitoringData> {
    response
        .data
        .iter()
        .map(|bucket| {
            let mut component_data = BTreeMap::new();
            component_data.insert(
                "measurement_count".to_string(),
                serde_json::json!(bucket.count),
            );
            if let Some(polygon_id) = &response.polygon_id {
                component_data.insert("polygon_id".to_string(), serde_json::json!(polygon_id));
            }

            FarmMonitoringData {
                id: Uuid::new_v4(),
                farm_id,
                condition_id,
                parameter_name: parameter_name.to_string(),
                value: bucket.data,
                unit: bucket.unit.clone(),
                timestamp: bucket.dt,
                component_data,
                data_quality: quality_from_count(bucket.count),
                confidence_score: (f64::from(bucket.count) / 20.0).min(1.0),
                source: source.to_string(),
                cloud_cover: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(buckets: Vec<(i64, f64, u32)>) -> WeatherResponse {
        WeatherResponse {
            polygon_id: Some("poly-7".to_string()),
            polygon_area: 12.5,
            time_range: TimeRange {
                start: 1_000,
                end: 2_000,
            },
            data: buckets
                .into_iter()
                .map(|(dt, data, count)| WeatherBucket {
                    dt,
                    data,
                    count,
                    unit: "mm".to_string(),
                })
                .collect(),
            total_data_value: 0.0,
            data_point_count: 0,
        }
    }

    #[test]
    fn test_one_record_per_bucket() {
        let resp = response(vec![(1_000, 0.5, 3), (1_100, 0.7, 8), (1_200, 0.2, 25)]);
        let records = to_measurements(
            &resp,
            FarmId::new(),
            ConditionId::new(),
            "RainFall",
            "weather",
        );

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].data_quality, DataQuality::Poor);
        assert_eq!(records[1].data_quality, DataQuality::Acceptable);
        assert_eq!(records[2].data_quality, DataQuality::Good);
        assert!((records[0].confidence_score - 0.15).abs() < 1e-9);
        assert_eq!(records[2].confidence_score, 1.0);
        assert_eq!(records[0].timestamp, 1_000);
        assert_eq!(
            records[0].component_data["polygon_id"],
            serde_json::json!("poly-7")
        );
    }
}
