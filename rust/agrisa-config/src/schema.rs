// Configuration schema definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error reading configuration
    #[error("I/O error: {0}")]
    Io(String),

    /// TOML parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration value failed validation
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgrisaConfig {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineSection,
    /// External provider endpoints
    #[serde(default)]
    pub providers: ProvidersSection,
    /// Notification retry settings
    #[serde(default)]
    pub notification: NotificationSection,
}

impl Default for AgrisaConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            providers: ProvidersSection::default(),
            notification: NotificationSection::default(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Data directory for the durable store
    pub data_dir: String,
    /// Upper bound on concurrent fetch workers per job
    pub max_fetch_workers: usize,
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
    /// Duplicate-claim suppression window in hours
    pub claim_dedup_hours: i64,
    /// Days until a generated claim auto-approves
    pub auto_approval_days: i64,
    /// Notice period after an approved cancel, in seconds
    pub notice_period_secs: u64,
    /// Window a farmer has to pay premium after underwriting approval, in seconds
    pub payment_window_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            max_fetch_workers: 10,
            http_timeout_secs: 30,
            claim_dedup_hours: 24,
            auto_approval_days: 7,
            notice_period_secs: 14 * 24 * 3600,
            payment_window_secs: 7 * 24 * 3600,
        }
    }
}

/// External provider endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersSection {
    /// Base URL override for the satellite imagery provider
    pub satellite_base_url: Option<String>,
    /// Base URL override for the weather aggregates provider
    pub weather_base_url: Option<String>,
}

/// Notification retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSection {
    /// Maximum background delivery attempts per notification
    pub max_attempts: u32,
    /// Spacing between delivery attempts, in seconds
    pub retry_spacing_secs: u64,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            retry_spacing_secs: 10,
        }
    }
}
