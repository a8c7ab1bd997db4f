//! Environmental data source catalog entries

use crate::domain::ids::{CategoryId, DataSourceId, TierId};
use serde::{Deserialize, Serialize};

/// External measurement source for one parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    /// Canonical parameter name, e.g. "RainFall" or "NDVI"
    pub parameter_name: String,
    pub provider: String,
    pub tier_id: TierId,
    pub category_id: CategoryId,
    pub unit: String,
    pub base_cost: f64,
    pub active: bool,
    /// Opaque endpoint; the fetch pipeline discriminates on
    /// "satellite" vs "weather" substrings
    pub api_endpoint: String,
    pub accuracy_rating: f64,
}

impl DataSource {
    /// Whether the endpoint serves satellite imagery statistics
    pub fn is_satellite(&self) -> bool {
        self.api_endpoint.contains("satellite")
    }

    /// Whether the endpoint serves weather aggregates
    pub fn is_weather(&self) -> bool {
        self.api_endpoint.contains("weather")
    }
}

/// Pricing tier for a data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTier {
    pub id: TierId,
    pub name: String,
    pub multiplier: f64,
}

/// Pricing category for a data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCategory {
    pub id: CategoryId,
    pub name: String,
    pub multiplier: f64,
}
