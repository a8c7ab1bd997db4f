//! External provider clients and response mapping
//!
//! Two heterogeneous providers feed the monitoring pipeline: satellite
//! imagery statistics and weather aggregates over a farm polygon. Both are
//! reached over plain HTTP with a shared timeout; transient failures map
//! to `EngineError::UpstreamTransient` so the fetch pipeline can retry.

pub mod satellite;
pub mod weather;

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate};
use std::time::Duration;
use tracing::instrument;

pub use satellite::SatelliteResponse;
pub use weather::WeatherResponse;

/// Parse an API "YYYY-MM-DD" date into unix seconds at midnight UTC
pub fn parse_api_date(date: &str) -> Option<i64> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Format unix seconds as an API "YYYY-MM-DD" date
pub fn format_api_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// HTTP client over the satellite and weather providers
pub struct ProviderClient {
    http: reqwest::Client,
}

impl ProviderClient {
    /// Build a client with the given request timeout
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { http })
    }

    /// Fetch satellite imagery statistics over a polygon
    ///
    /// The polygon outer ring must carry at least 3 points. Dates are
    /// "YYYY-MM-DD" per the provider contract.
    #[instrument(skip(self, ring), fields(points = ring.len()))]
    pub async fn fetch_satellite(
        &self,
        endpoint: &str,
        ring: &[[f64; 2]],
        start_date: &str,
        end_date: &str,
        parameter: &str,
    ) -> EngineResult<SatelliteResponse> {
        if ring.len() < 3 {
            return Err(EngineError::Validation(format!(
                "satellite fetch needs at least 3 polygon points, got {}",
                ring.len()
            )));
        }

        let body = serde_json::json!({
            "geometry": { "type": "Polygon", "coordinates": [ring] },
            "start_date": start_date,
            "end_date": end_date,
            "index": parameter,
        });

        let response: SatelliteResponse = self.post_json(endpoint, &body).await?;
        if response.status != "success" {
            return Err(EngineError::UpstreamTransient(format!(
                "satellite provider returned status {:?}",
                response.status
            )));
        }
        tracing::debug!(
            images = response.data.summary.images_processed,
            "satellite response received"
        );
        Ok(response)
    }

    /// Fetch weather aggregates over the farm's first four corners
    #[instrument(skip(self, corners))]
    pub async fn fetch_weather(
        &self,
        endpoint: &str,
        corners: [[f64; 2]; 4],
        start_ts: i64,
        end_ts: i64,
        parameter: &str,
    ) -> EngineResult<WeatherResponse> {
        let body = serde_json::json!({
            "corners": corners,
            "start": start_ts,
            "end": end_ts,
            "parameter": parameter,
        });
        self.post_json(endpoint, &body).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> EngineResult<T> {
        let response = self
            .http
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::UpstreamTransient(format!("request to {} timed out", endpoint))
                } else {
                    EngineError::UpstreamTransient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::UpstreamTransient(format!(
                "HTTP {} from {}",
                status, endpoint
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::UpstreamTransient(format!("bad response body: {}", e)))
    }
}
