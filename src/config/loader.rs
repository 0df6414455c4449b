//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles file discovery,
//! environment detection and merging of environment variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::BrokerConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: BrokerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading broker configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        debug!(
            environment = %environment,
            hosted_zone = %config.dns.hosted_zone_id,
            workers = config.queue.workers,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<BrokerConfig> {
        let base = config_directory.join("broker.toml");
        let overlay = config_directory.join(format!("broker.{environment}.toml"));

        Config::builder()
            .add_source(File::new(&base.to_string_lossy(), FileFormat::Toml).required(false))
            .add_source(File::new(&overlay.to_string_lossy(), FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("BROKER")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("alb.shared_listener_arns")
                    .with_list_parse_key("alb.dedicated_alb_arns")
                    .with_list_parse_key("waf.rule_group_arns")
                    .try_parsing(true),
            )
            .build()
            .and_then(|merged| merged.try_deserialize::<BrokerConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    /// Detect the running environment
    pub fn detect_environment() -> String {
        env::var("BROKER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BASE: &str = r#"
[dns]
hosted_zone_id = "ZBASE"
root_domain = "domains.example.net"

[encryption]
key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

[retry]
standard_max_retries = 5
"#;

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broker.toml"), BASE).unwrap();
        fs::write(
            dir.path().join("broker.test.toml"),
            "[retry]\nstandard_max_retries = 2\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().dns.hosted_zone_id, "ZBASE");
        assert_eq!(manager.config().retry.standard_max_retries, 2);
        // untouched sections keep their defaults
        assert_eq!(manager.config().retry.fast_max_retries, 10);
    }

    #[test]
    fn test_missing_zone_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broker.toml"), "[retry]\nfast_max_retries = 3\n").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }
}
