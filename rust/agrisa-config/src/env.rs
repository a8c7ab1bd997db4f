// Environment variable overrides

use crate::schema::{AgrisaConfig, ConfigError};

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("invalid {}: {}", key, value)))
}

/// Apply `AGRISA_*` environment variable overrides to a configuration
pub fn apply_env_overrides(config: &mut AgrisaConfig) -> Result<(), ConfigError> {
    for (key, value) in std::env::vars() {
        match key.as_str() {
            "AGRISA_DATA_DIR" => config.engine.data_dir = value,
            "AGRISA_MAX_FETCH_WORKERS" => {
                config.engine.max_fetch_workers = parse_var(&key, &value)?;
            }
            "AGRISA_HTTP_TIMEOUT_SECS" => {
                config.engine.http_timeout_secs = parse_var(&key, &value)?;
            }
            "AGRISA_CLAIM_DEDUP_HOURS" => {
                config.engine.claim_dedup_hours = parse_var(&key, &value)?;
            }
            "AGRISA_AUTO_APPROVAL_DAYS" => {
                config.engine.auto_approval_days = parse_var(&key, &value)?;
            }
            "AGRISA_NOTICE_PERIOD_SECS" => {
                config.engine.notice_period_secs = parse_var(&key, &value)?;
            }
            "AGRISA_PAYMENT_WINDOW_SECS" => {
                config.engine.payment_window_secs = parse_var(&key, &value)?;
            }
            "AGRISA_SATELLITE_BASE_URL" => {
                config.providers.satellite_base_url = Some(value);
            }
            "AGRISA_WEATHER_BASE_URL" => {
                config.providers.weather_base_url = Some(value);
            }
            "AGRISA_NOTIFY_MAX_ATTEMPTS" => {
                config.notification.max_attempts = parse_var(&key, &value)?;
            }
            "AGRISA_NOTIFY_RETRY_SPACING_SECS" => {
                config.notification.retry_spacing_secs = parse_var(&key, &value)?;
            }
            _ => {}
        }
    }

    Ok(())
}
