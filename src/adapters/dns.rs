use async_trait::async_trait;

use crate::error::AdapterResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Txt,
    A,
    Aaaa,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Text(String),
    /// Alias to a provider-managed hostname
    Alias {
        target: String,
        hosted_zone_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordType,
    pub value: RecordValue,
    pub ttl: u32,
}

impl DnsRecord {
    pub fn txt(name: impl Into<String>, contents: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            record_type: RecordType::Txt,
            value: RecordValue::Text(contents.into()),
            ttl,
        }
    }

    /// A and AAAA alias pair for one name
    pub fn alias_pair(name: &str, target: &str, hosted_zone_id: &str) -> [Self; 2] {
        [RecordType::A, RecordType::Aaaa].map(|record_type| Self {
            name: name.to_string(),
            record_type,
            value: RecordValue::Alias {
                target: target.to_string(),
                hosted_zone_id: hosted_zone_id.to_string(),
            },
            ttl: 0,
        })
    }
}

/// Propagation state of a submitted change batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Pending,
    InSync,
}

/// Authoritative DNS provider
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace records in one change batch; returns the change id
    async fn upsert_records(&self, zone_id: &str, records: &[DnsRecord]) -> AdapterResult<String>;

    /// Delete records in one change batch; `NotFound` when none exist
    async fn delete_records(&self, zone_id: &str, records: &[DnsRecord]) -> AdapterResult<String>;

    async fn change_status(&self, change_id: &str) -> AdapterResult<ChangeStatus>;

    /// Returns the health check id
    async fn create_health_check(&self, domain: &str, caller_reference: &str)
        -> AdapterResult<String>;

    async fn delete_health_check(&self, health_check_id: &str) -> AdapterResult<()>;
}

pub fn health_check_arn(health_check_id: &str) -> String {
    format!("arn:aws:route53:::healthcheck/{health_check_id}")
}
