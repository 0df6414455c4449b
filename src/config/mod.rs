//! # Broker Configuration System
//!
//! Layered configuration for the provisioning pipeline: serde defaults, then
//! `config/broker.toml`, then `config/broker.{environment}.toml`, then
//! `BROKER__*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use domain_broker::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let zone = &manager.config().dns.hosted_zone_id;
//! let budget = manager.config().retry.standard_max_retries;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub acme: AcmeConfig,
    pub dns: DnsConfig,
    pub certificates: CertificateStoreConfig,
    pub alb: AlbConfig,
    pub cdn: CdnConfig,
    pub waf: WafConfig,
    pub alarms: AlarmsConfig,
    pub renewal: RenewalConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
    /// Tags applied to every external resource the broker creates
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/domain_broker_development".to_string(),
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    /// A claimed job becomes visible again after this long without an ack
    pub visibility_timeout_seconds: u64,
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            visibility_timeout_seconds: 3600,
            workers: 4,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

/// Retry budgets for retriable steps
///
/// The standard budget retries every ten minutes for roughly a day; the fast
/// budget is for short polling steps.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub standard_max_retries: u32,
    pub standard_delay_seconds: u64,
    pub fast_max_retries: u32,
    pub fast_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            standard_max_retries: 144,
            standard_delay_seconds: 600,
            fast_max_retries: 10,
            fast_delay_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeConfig {
    pub directory_url: String,
    pub account_email: String,
    pub finalize_timeout_seconds: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: "https://acme-staging-v02.api.letsencrypt.org/directory".to_string(),
            account_email: "admin@example.com".to_string(),
            finalize_timeout_seconds: 90,
        }
    }
}

impl AcmeConfig {
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Hosted zone holding validation and alias records
    pub hosted_zone_id: String,
    /// Suffix under which broker-managed records live, e.g. `domains.example.net`
    pub root_domain: String,
    pub txt_ttl: u32,
    pub change_poll_interval_ms: u64,
    pub change_max_attempts: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            hosted_zone_id: String::new(),
            root_domain: String::new(),
            txt_ttl: 60,
            change_poll_interval_ms: 30_000,
            change_max_attempts: 20,
        }
    }
}

impl DnsConfig {
    pub fn change_poll_interval(&self) -> Duration {
        Duration::from_millis(self.change_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificateStoreConfig {
    pub cdn_path: String,
    pub alb_path: String,
}

impl Default for CertificateStoreConfig {
    fn default() -> Self {
        Self {
            cdn_path: "/cloudfront/external-domains/".to_string(),
            alb_path: "/alb/external-domains/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlbConfig {
    /// HTTPS listeners of the shared load balancers
    pub shared_listener_arns: Vec<String>,
    /// Load balancers whose listeners form the dedicated capacity pool
    pub dedicated_alb_arns: Vec<String>,
    pub max_certificates_per_listener: usize,
    /// Time both certificates stay on a listener during rotation
    pub certificate_overlap_seconds: u64,
}

impl Default for AlbConfig {
    fn default() -> Self {
        Self {
            shared_listener_arns: Vec::new(),
            dedicated_alb_arns: Vec::new(),
            max_certificates_per_listener: 19,
            certificate_overlap_seconds: 60,
        }
    }
}

impl AlbConfig {
    pub fn certificate_overlap(&self) -> Duration {
        Duration::from_secs(self.certificate_overlap_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Hosted zone id that alias records to distributions must use
    pub hosted_zone_id: String,
    pub default_origin: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    /// Wait before deleting a certificate that a distribution just stopped using
    pub old_certificate_delay_seconds: u64,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            hosted_zone_id: "Z2FDTNDATAQYW2".to_string(),
            default_origin: String::new(),
            poll_interval_ms: 60_000,
            max_poll_attempts: 50,
            old_certificate_delay_seconds: 0,
        }
    }
}

impl CdnConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn old_certificate_delay(&self) -> Duration {
        Duration::from_secs(self.old_certificate_delay_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WafConfig {
    pub name_prefix: String,
    /// Managed rule groups attached to every broker web ACL
    pub rule_group_arns: Vec<String>,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            name_prefix: "domain-broker".to_string(),
            rule_group_arns: Vec::new(),
            poll_interval_ms: 10_000,
            max_poll_attempts: 10,
        }
    }
}

impl WafConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlarmsConfig {
    pub name_prefix: String,
    /// Fallback subscriber for instances that did not provide one
    pub notification_email: Option<String>,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for AlarmsConfig {
    fn default() -> Self {
        Self {
            name_prefix: "domain-broker".to_string(),
            notification_email: None,
            poll_interval_ms: 5_000,
            max_poll_attempts: 10,
        }
    }
}

impl AlarmsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenewalConfig {
    pub days_before_expiry: i64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            days_before_expiry: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte key for private keys at rest
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to `RUST_LOG`, then the environment default
    pub level: Option<String>,
    pub json: bool,
}

impl BrokerConfig {
    /// Validate values that would otherwise fail deep inside a pipeline
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "must be at least 1",
            ));
        }

        if self.queue.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.workers",
                "0",
                "must be at least 1",
            ));
        }

        if self.dns.hosted_zone_id.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "hosted_zone_id",
                "dns",
            ));
        }

        if self.dns.root_domain.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "root_domain",
                "dns",
            ));
        }

        if self.dns.change_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "dns.change_max_attempts",
                "0",
                "must be at least 1",
            ));
        }

        if self.alb.max_certificates_per_listener == 0 {
            return Err(ConfigurationError::invalid_value(
                "alb.max_certificates_per_listener",
                "0",
                "must be at least 1",
            ));
        }

        // a step that outlives its lease is redelivered to another worker
        let lease = self.queue.visibility_timeout();
        for (field, wait) in self.longest_step_waits() {
            if wait >= lease {
                return Err(ConfigurationError::invalid_value(
                    field,
                    format!("{}s", wait.as_secs()),
                    format!(
                        "must finish within queue.visibility_timeout_seconds ({}s)",
                        lease.as_secs()
                    ),
                ));
            }
        }

        self.encryption_key()?;
        Ok(())
    }

    /// Longest time a single step may block, keyed by the setting that bounds it
    pub fn longest_step_waits(&self) -> Vec<(&'static str, Duration)> {
        let budget = |interval: Duration, attempts: u32| interval.checked_mul(attempts).unwrap_or(Duration::MAX);
        vec![
            ("acme.finalize_timeout_seconds", self.acme.finalize_timeout()),
            (
                "dns.change_max_attempts",
                budget(self.dns.change_poll_interval(), self.dns.change_max_attempts),
            ),
            ("alb.certificate_overlap_seconds", self.alb.certificate_overlap()),
            (
                "cdn.max_poll_attempts",
                budget(self.cdn.poll_interval(), self.cdn.max_poll_attempts),
            ),
            ("cdn.old_certificate_delay_seconds", self.cdn.old_certificate_delay()),
            (
                "waf.max_poll_attempts",
                budget(self.waf.poll_interval(), self.waf.max_poll_attempts),
            ),
            (
                "alarms.max_poll_attempts",
                budget(self.alarms.poll_interval(), self.alarms.max_poll_attempts),
            ),
        ]
    }

    /// Decode the at-rest encryption key
    pub fn encryption_key(&self) -> ConfigResult<[u8; 32]> {
        if self.encryption.key.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "key",
                "encryption",
            ));
        }

        let bytes = BASE64.decode(&self.encryption.key).map_err(|e| {
            ConfigurationError::invalid_value("encryption.key", "[redacted]", e.to_string())
        })?;

        bytes.try_into().map_err(|bytes: Vec<u8>| {
            ConfigurationError::invalid_value(
                "encryption.key",
                "[redacted]",
                format!("expected 32 bytes, got {}", bytes.len()),
            )
        })
    }

    /// Fully-qualified name of a broker-managed record, e.g. the target of a
    /// customer's `_acme-challenge` CNAME
    pub fn managed_record_name(&self, name: &str) -> String {
        format!("{}.{}", name.trim_end_matches('.'), self.dns.root_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BrokerConfig {
        let mut config = BrokerConfig::default();
        config.dns.hosted_zone_id = "Z123".to_string();
        config.dns.root_domain = "domains.example.net".to_string();
        config.encryption.key = BASE64.encode([7u8; 32]);
        config
    }

    #[test]
    fn test_defaults_match_retry_budgets() {
        let config = BrokerConfig::default();
        assert_eq!(config.retry.standard_max_retries, 144);
        assert_eq!(config.retry.standard_delay_seconds, 600);
        assert_eq!(config.retry.fast_max_retries, 10);
    }

    #[test]
    fn test_validation_requires_dns_zone() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.dns.hosted_zone_id.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_defaults_fit_within_queue_lease() {
        let config = valid_config();
        let lease = config.queue.visibility_timeout();
        for (field, wait) in config.longest_step_waits() {
            assert!(wait < lease, "{field} waits {wait:?}");
        }
    }

    #[test]
    fn test_poll_budget_beyond_queue_lease_is_rejected() {
        let mut config = valid_config();
        config.queue.visibility_timeout_seconds = 3600;
        config.dns.change_poll_interval_ms = 30_000;
        config.dns.change_max_attempts = 120;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "dns.change_max_attempts"
        ));

        config.dns.change_max_attempts = 119;
        assert!(config.validate().is_ok());

        config.cdn.max_poll_attempts = u32::MAX;
        config.cdn.poll_interval_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encryption_key_length_is_checked() {
        let mut config = valid_config();
        config.encryption.key = BASE64.encode([1u8; 16]);
        assert!(config.encryption_key().is_err());
    }

    #[test]
    fn test_managed_record_name() {
        let config = valid_config();
        assert_eq!(
            config.managed_record_name("_acme-challenge.example.com."),
            "_acme-challenge.example.com.domains.example.net"
        );
    }
}
