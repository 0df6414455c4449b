//! # External Service Adapters
//!
//! Typed contracts for every system the pipeline talks to. Implementations
//! live outside this crate; steps only see these traits, bundled into
//! [`Adapters`].

pub mod acme;
pub mod alarms;
pub mod cdn;
pub mod certificate_store;
pub mod dns;
pub mod load_balancer;
pub mod notifications;
pub mod polling;
pub mod shield;
pub mod waf;

use std::sync::Arc;

pub use acme::{AcmeAccount, AcmeClient, AcmeCredentials, Dns01Challenge};
pub use alarms::{Alarms, ComparisonOperator, MetricAlarm};
pub use cdn::{Cdn, Distribution, DistributionConfig, DistributionStatus};
pub use certificate_store::{CertificateStore, ServerCertificate, ServerCertificateUpload};
pub use dns::{health_check_arn, ChangeStatus, DnsProvider, DnsRecord, RecordType, RecordValue};
pub use load_balancer::{LoadBalancer, LoadBalancerAddress};
pub use notifications::Notifications;
pub use polling::poll_until;
pub use shield::Shield;
pub use waf::{Waf, WebAcl, WebAclScope};

/// Every collaborator a pipeline step may call
#[derive(Clone)]
pub struct Adapters {
    pub acme: Arc<dyn AcmeClient>,
    pub dns: Arc<dyn DnsProvider>,
    pub certificate_store: Arc<dyn CertificateStore>,
    pub load_balancer: Arc<dyn LoadBalancer>,
    pub cdn: Arc<dyn Cdn>,
    pub waf: Arc<dyn Waf>,
    pub shield: Arc<dyn Shield>,
    pub alarms: Arc<dyn Alarms>,
    pub notifications: Arc<dyn Notifications>,
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters").finish_non_exhaustive()
    }
}
