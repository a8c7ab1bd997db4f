// Configuration loading and management

use crate::env::apply_env_overrides;
use crate::schema::{AgrisaConfig, ConfigError};
use std::path::Path;

/// Load configuration from an optional file path and environment variables
///
/// Loading hierarchy: env > file > defaults
pub fn load_config(path: Option<&Path>) -> Result<AgrisaConfig, ConfigError> {
    let mut config = match path {
        Some(p) if p.exists() => load_from_file(p)?,
        Some(p) => {
            return Err(ConfigError::Io(format!(
                "config file {} does not exist",
                p.display()
            )))
        }
        None => AgrisaConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<AgrisaConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Validate configuration
pub fn validate_config(config: &AgrisaConfig) -> Result<(), ConfigError> {
    if config.engine.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "engine.data_dir cannot be empty".to_string(),
        ));
    }
    if config.engine.max_fetch_workers == 0 {
        return Err(ConfigError::Validation(
            "engine.max_fetch_workers must be positive".to_string(),
        ));
    }
    if config.engine.http_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.http_timeout_secs must be positive".to_string(),
        ));
    }
    if config.engine.claim_dedup_hours <= 0 {
        return Err(ConfigError::Validation(
            "engine.claim_dedup_hours must be positive".to_string(),
        ));
    }
    if config.notification.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "notification.max_attempts must be positive".to_string(),
        ));
    }

    for (name, url) in [
        ("providers.satellite_base_url", &config.providers.satellite_base_url),
        ("providers.weather_base_url", &config.providers.weather_base_url),
    ] {
        if let Some(url) = url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{} must be http:// or https://",
                    name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AgrisaConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.engine.max_fetch_workers, 10);
        assert_eq!(config.engine.http_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[engine]
data_dir = "/var/lib/agrisa"
max_fetch_workers = 4
http_timeout_secs = 10
claim_dedup_hours = 24
auto_approval_days = 7
notice_period_secs = 3600
payment_window_secs = 3600

[providers]
satellite_base_url = "https://sat.example.com"
"#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.engine.data_dir, "/var/lib/agrisa");
        assert_eq!(config.engine.max_fetch_workers, 4);
        assert_eq!(
            config.providers.satellite_base_url.as_deref(),
            Some("https://sat.example.com")
        );
    }

    #[test]
    fn test_invalid_provider_url_rejected() {
        let mut config = AgrisaConfig::default();
        config.providers.weather_base_url = Some("ftp://weather".to_string());
        assert!(validate_config(&config).is_err());
    }
}
