// Test Helpers Module - in-memory broker for unit and integration tests
//
// Wires the broker service, scheduler and steps to the in-memory store and
// queue and to fake collaborators, so whole pipelines run without Postgres
// or cloud credentials.

pub mod fakes;

use std::sync::Arc;

use crate::broker::{BrokerService, InstanceRequest};
use crate::config::BrokerConfig;
use crate::database::MemoryStore;
use crate::error::{BrokerError, Result};
use crate::models::{Certificate, Operation, ServiceInstance};
use crate::pipeline::StepContext;
use crate::database::BrokerStore;
use crate::scheduler::{JobOutcome, MemoryQueue, Scheduler};

pub use fakes::{
    CallLog, FakeAcme, FakeAlarms, FakeCdn, FakeCertificateStore, FakeCloud, FakeDns,
    FakeLoadBalancer, FakeNotifications, FakeShield, FakeWaf,
};

/// 32 bytes of 0x07, base64 encoded
pub const TEST_ENCRYPTION_KEY: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";

pub const SHARED_ALB_ARN: &str =
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:loadbalancer/app/shared-1/0a1b2c";
pub const SHARED_LISTENER_ARNS: [&str; 2] = [
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:listener/app/shared-1/0a1b2c/l1",
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:listener/app/shared-1/0a1b2c/l2",
];

pub const DEDICATED_ALB_ARN: &str =
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:loadbalancer/app/dedicated-1/3d4e5f";
pub const DEDICATED_LISTENER_ARNS: [&str; 2] = [
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:listener/app/dedicated-1/3d4e5f/d1",
    "arn:aws:elasticloadbalancing:us-gov-west-1:000000000000:listener/app/dedicated-1/3d4e5f/d2",
];

/// Configuration with no waits and small retry budgets
pub fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();

    config.queue.poll_interval_ms = 10;
    config.retry.standard_max_retries = 3;
    config.retry.standard_delay_seconds = 0;
    config.retry.fast_max_retries = 2;
    config.retry.fast_delay_seconds = 0;

    config.acme.account_email = "broker@domains.example.net".to_string();
    config.acme.finalize_timeout_seconds = 1;

    config.dns.hosted_zone_id = "ZTEST".to_string();
    config.dns.root_domain = "domains.example.net".to_string();
    config.dns.change_poll_interval_ms = 0;
    config.dns.change_max_attempts = 5;

    config.alb.shared_listener_arns = SHARED_LISTENER_ARNS.iter().map(|arn| arn.to_string()).collect();
    config.alb.dedicated_alb_arns = vec![DEDICATED_ALB_ARN.to_string()];
    config.alb.max_certificates_per_listener = 19;
    config.alb.certificate_overlap_seconds = 0;

    config.cdn.default_origin = "origin.apps.example.net".to_string();
    config.cdn.poll_interval_ms = 0;
    config.cdn.max_poll_attempts = 5;
    config.cdn.old_certificate_delay_seconds = 0;

    config.waf.name_prefix = "test-broker".to_string();
    config.waf.poll_interval_ms = 0;
    config.waf.max_poll_attempts = 5;

    config.alarms.name_prefix = "test-broker".to_string();
    config.alarms.notification_email = Some("alerts@domains.example.net".to_string());
    config.alarms.poll_interval_ms = 0;
    config.alarms.max_poll_attempts = 5;

    config.encryption.key = TEST_ENCRYPTION_KEY.to_string();
    config
        .tags
        .insert("environment".to_string(), "test".to_string());
    config
}

/// A complete broker backed by memory and fakes
#[derive(Debug, Clone)]
pub struct TestHarness {
    pub config: Arc<BrokerConfig>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub cloud: FakeCloud,
    pub scheduler: Arc<Scheduler>,
    pub broker: BrokerService,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: BrokerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let cloud = FakeCloud::new();

        for listener in SHARED_LISTENER_ARNS {
            cloud.load_balancer.add_listener(listener, SHARED_ALB_ARN);
        }
        for listener in DEDICATED_LISTENER_ARNS {
            cloud.load_balancer.add_listener(listener, DEDICATED_ALB_ARN);
        }

        let context = StepContext::new(store.clone(), cloud.adapters(), config.clone())?;
        let scheduler = Arc::new(Scheduler::new(context, queue.clone()));
        let broker = BrokerService::new(scheduler.clone());

        Ok(Self {
            config,
            store,
            queue,
            cloud,
            scheduler,
            broker,
        })
    }

    pub fn context(&self) -> &StepContext {
        self.scheduler.context()
    }

    /// Run queued steps until nothing is ready
    pub async fn run_until_idle(&self) -> Result<Vec<JobOutcome>> {
        self.scheduler.run_until_idle().await
    }

    /// Create an instance, provision it and run the pipeline to the end
    pub async fn provision(&self, request: InstanceRequest) -> Result<Operation> {
        let id = request.id.clone();
        self.broker.create_instance(request).await?;
        let operation = self.broker.enqueue_provision(&id).await?;
        self.run_until_idle().await?;
        self.operation(operation.id).await
    }

    pub async fn instance(&self, service_instance_id: &str) -> Result<ServiceInstance> {
        self.store
            .get_instance(service_instance_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("service instance", service_instance_id))
    }

    pub async fn operation(&self, operation_id: i64) -> Result<Operation> {
        self.context().load_operation(operation_id).await
    }

    pub async fn certificates(&self, service_instance_id: &str) -> Result<Vec<Certificate>> {
        self.store.list_certificates(service_instance_id).await
    }
}
