use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::AdapterResult;

#[derive(Debug, Clone)]
pub struct ServerCertificateUpload<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub certificate_body: &'a str,
    pub private_key: &'a str,
    pub certificate_chain: &'a str,
}

/// Identifiers of a stored server certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCertificate {
    pub id: String,
    pub name: String,
    pub arn: String,
}

/// Server certificate store
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// `AlreadyExists` when the name is taken
    async fn upload(&self, upload: &ServerCertificateUpload<'_>)
        -> AdapterResult<ServerCertificate>;

    async fn get(&self, name: &str) -> AdapterResult<ServerCertificate>;

    async fn delete(&self, name: &str) -> AdapterResult<()>;

    async fn tag(&self, name: &str, tags: &BTreeMap<String, String>) -> AdapterResult<()>;
}
