//! AI risk-analysis collaborator contract
//!
//! The analysis itself is an opaque external call; the engine only
//! schedules it after each fetch run and records the outcome.

use crate::domain::RegisteredPolicyId;
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of one risk analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub registered_policy_id: RegisteredPolicyId,
    /// Normalized risk score in [0, 1]
    pub risk_score: f64,
    pub summary: String,
    /// Unix seconds
    pub analyzed_at: i64,
}

/// Opaque request/response risk analyzer
#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        policy_id: RegisteredPolicyId,
        force_reanalysis: bool,
    ) -> EngineResult<RiskAssessment>;
}

/// Analyzer that reports a neutral score; used by tests and as a default
pub struct NoopRiskAnalyzer;

#[async_trait]
impl RiskAnalyzer for NoopRiskAnalyzer {
    async fn analyze(
        &self,
        policy_id: RegisteredPolicyId,
        _force_reanalysis: bool,
    ) -> EngineResult<RiskAssessment> {
        Ok(RiskAssessment {
            registered_policy_id: policy_id,
            risk_score: 0.5,
            summary: "no analysis performed".to_string(),
            analyzed_at: chrono::Utc::now().timestamp(),
        })
    }
}
