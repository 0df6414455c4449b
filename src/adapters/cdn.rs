use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::AdapterResult;
use crate::models::CookiePolicy;

/// The parts of a distribution's configuration the broker manages
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionConfig {
    pub caller_reference: String,
    pub aliases: Vec<String>,
    pub origin_hostname: String,
    pub origin_path: String,
    pub origin_protocol_policy: String,
    pub forward_cookie_policy: CookiePolicy,
    pub forwarded_cookies: Vec<String>,
    pub forwarded_headers: Vec<String>,
    pub error_responses: BTreeMap<String, String>,
    /// Server certificate id in the certificate store
    pub server_certificate_id: Option<String>,
    pub web_acl_arn: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub id: String,
    pub arn: String,
    pub domain_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionStatus {
    InProgress,
    Deployed,
}

/// CDN distribution API; reads and deletes of a missing distribution fail
/// with `NotFound`
#[async_trait]
pub trait Cdn: Send + Sync {
    /// Fails with `AlreadyExists` when the caller reference was used before
    async fn create_distribution(
        &self,
        config: &DistributionConfig,
        tags: &BTreeMap<String, String>,
    ) -> AdapterResult<Distribution>;

    /// The distribution created with `caller_reference`, if any
    async fn find_distribution(&self, caller_reference: &str) -> AdapterResult<Option<Distribution>>;

    async fn get_distribution(&self, id: &str) -> AdapterResult<Distribution>;

    /// Returns the configuration and its etag
    async fn get_distribution_config(&self, id: &str)
        -> AdapterResult<(DistributionConfig, String)>;

    async fn update_distribution(
        &self,
        id: &str,
        config: &DistributionConfig,
        etag: &str,
    ) -> AdapterResult<()>;

    async fn get_status(&self, id: &str) -> AdapterResult<DistributionStatus>;

    async fn delete_distribution(&self, id: &str, etag: &str) -> AdapterResult<()>;
}
