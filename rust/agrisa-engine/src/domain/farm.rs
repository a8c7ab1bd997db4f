//! Farm and boundary geometry

use crate::domain::ids::{FarmId, FarmerId};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// GeoJSON polygon boundary
///
/// Coordinates are [longitude, latitude] pairs; the first ring is the
/// outer boundary, any further rings are holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmBoundary {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl FarmBoundary {
    /// The outer ring; requires at least 3 points
    pub fn outer_ring(&self) -> EngineResult<&[[f64; 2]]> {
        let ring = self
            .coordinates
            .first()
            .map(Vec::as_slice)
            .unwrap_or_default();
        if ring.len() < 3 {
            return Err(EngineError::Validation(format!(
                "farm boundary outer ring has {} points, need at least 3",
                ring.len()
            )));
        }
        Ok(ring)
    }

    /// The first four corners, required by the weather provider
    pub fn corners(&self) -> EngineResult<[[f64; 2]; 4]> {
        let ring = self.outer_ring()?;
        if ring.len() < 4 {
            return Err(EngineError::Validation(format!(
                "farm boundary has {} points, weather fetch needs at least 4",
                ring.len()
            )));
        }
        Ok([ring[0], ring[1], ring[2], ring[3]])
    }
}

/// A farm registered by a farmer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farm {
    pub id: FarmId,
    pub owner: FarmerId,
    pub name: String,
    pub boundary: FarmBoundary,
    pub area_hectares: f64,
    /// Polygon id assigned by the weather provider, written back on fetch
    pub provider_polygon_id: Option<String>,
}
