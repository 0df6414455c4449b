use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::AdapterResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebAclScope {
    /// Attached to CDN distributions
    CloudFront,
    /// Attached to regional resources such as load balancers
    Regional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAcl {
    pub id: String,
    pub arn: String,
    pub name: String,
}

/// Web application firewall API
#[async_trait]
pub trait Waf: Send + Sync {
    /// `AlreadyExists` when the name is taken
    async fn create_web_acl(
        &self,
        name: &str,
        scope: WebAclScope,
        rule_group_arns: &[String],
        tags: &BTreeMap<String, String>,
    ) -> AdapterResult<WebAcl>;

    /// Returns the web ACL and the lock token required to modify it
    async fn get_web_acl(&self, name: &str, scope: WebAclScope) -> AdapterResult<(WebAcl, String)>;

    /// `Conflict` when the lock token is stale or the ACL is still associated
    async fn delete_web_acl(
        &self,
        web_acl: &WebAcl,
        scope: WebAclScope,
        lock_token: &str,
    ) -> AdapterResult<()>;

    async fn associate_web_acl(&self, web_acl_arn: &str, resource_arn: &str) -> AdapterResult<()>;
}
