//! Satellite provider response shapes and measurement mapping

use crate::domain::{ConditionId, DataQuality, FarmId, FarmMonitoringData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Top-level satellite provider response
///
/// `status != "success"` means the provider reported an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteResponse {
    pub status: String,
    pub data: SatelliteData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteData {
    pub summary: SatelliteSummary,
    pub images: Vec<SatelliteImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteSummary {
    pub images_processed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteImage {
    pub image_index: u32,
    /// "YYYY-MM-DD"
    pub acquisition_date: String,
    pub cloud_cover: CloudCover,
    #[serde(default)]
    pub ndmi_statistics: Option<IndexStatistics>,
    #[serde(default)]
    pub ndvi_statistics: Option<IndexStatistics>,
    #[serde(default)]
    pub component_data: Option<ComponentBands>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudCover {
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatistics {
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub median: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentBands {
    #[serde(default)]
    pub nir: Option<f64>,
    #[serde(default)]
    pub red: Option<f64>,
    #[serde(default)]
    pub swir: Option<f64>,
}

fn quality_from_cloud_cover(cloud_cover: f64) -> DataQuality {
    if cloud_cover <= 20.0 {
        DataQuality::Good
    } else if cloud_cover <= 50.0 {
        DataQuality::Acceptable
    } else {
        DataQuality::Poor
    }
}

/// Convert a satellite response into canonical measurements
///
/// Each image yields one record when its statistics carry a mean; images
/// without one are dropped. Extra statistics land in the component-data
/// "statistics" entry alongside the raw bands.
pub fn to_measurements(
    response: &SatelliteResponse,
    farm_id: FarmId,
    condition_id: ConditionId,
    parameter_name: &str,
    unit: &str,
    source: &str,
) -> Vec<FarmMonitoringData> {
    let wants_ndmi = parameter_name.to_ascii_lowercase().contains("ndmi");

    response
        .data
        .images
        .iter()
        .filter_map(|image| {
            let statistics = if wants_ndmi {
                image.ndmi_statistics.as_ref().or(image.ndvi_statistics.as_ref())
            } else {
                image.ndvi_statistics.as_ref().or(image.ndmi_statistics.as_ref())
            }?;
            let mean = match statistics.mean {
                Some(mean) => mean,
                None => {
                    tracing::debug!(
                        image_index = image.image_index,
                        acquisition_date = %image.acquisition_date,
                        "satellite image dropped: statistics carry no mean"
                    );
                    return None;
                }
            };
            let timestamp = match super::parse_api_date(&image.acquisition_date) {
                Some(ts) => ts,
                None => {
                    tracing::warn!(
                        acquisition_date = %image.acquisition_date,
                        "satellite image dropped: unparseable acquisition date"
                    );
                    return None;
                }
            };

            let cloud_cover = image.cloud_cover.value;
            let mut component_data = BTreeMap::new();
            component_data.insert(
                "statistics".to_string(),
                serde_json::json!({
                    "median": statistics.median,
                    "min": statistics.min,
                    "max": statistics.max,
                    "std_dev": statistics.std_dev,
                }),
            );
            if let Some(bands) = &image.component_data {
                component_data.insert(
                    "bands".to_string(),
                    serde_json::json!({
                        "nir": bands.nir,
                        "red": bands.red,
                        "swir": bands.swir,
                    }),
                );
            }

            Some(FarmMonitoringData {
                id: Uuid::new_v4(),
                farm_id,
                condition_id,
                parameter_name: parameter_name.to_string(),
                value: mean,
                unit: unit.to_string(),
                timestamp,
                component_data,
                data_quality: quality_from_cloud_cover(cloud_cover),
                confidence_score: ((100.0 - cloud_cover) / 100.0).clamp(0.0, 1.0),
                source: source.to_string(),
                cloud_cover: Some(cloud_cover),
            })
        })
        .collect()
}
