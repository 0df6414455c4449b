//! # Broker Service
//!
//! The operations the broker API layer calls: create an instance, start a
//! pipeline for it, cancel a running operation and report progress.
//!
//! Every `enqueue_*` call creates one [`Operation`], builds the pipeline for
//! the instance's kind and hands its first step to the [`Scheduler`]. At most
//! one live operation per instance is allowed; a deprovision request cancels
//! a running provision, update or renewal first.
//!
//! ```rust
//! use domain_broker::models::InstanceKind;
//! use domain_broker::state_machine::OperationState;
//! use domain_broker::test_helpers::TestHarness;
//! use domain_broker::InstanceRequest;
//!
//! # tokio_test::block_on(async {
//! let harness = TestHarness::new().unwrap();
//! let request = InstanceRequest::new("4321", InstanceKind::Alb, ["example.com"]);
//! let operation = harness.provision(request).await.unwrap();
//! assert_eq!(operation.state, OperationState::Succeeded);
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::database::BrokerStore;
use crate::error::{BrokerError, Result};
use crate::logging::log_pipeline_operation;
use crate::models::{
    normalize_domain_names, CdnSettings, InstanceKind, NewOperation, Operation, OperationAction,
    ServiceInstance,
};
use crate::pipeline::pipeline_for;
use crate::scheduler::Scheduler;
use crate::state_machine::{OperationEvent, OperationState, OperationStateMachine};

/// Longest domain name DNS allows
const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Parameters of a new service instance
#[derive(Debug, Clone)]
pub struct InstanceRequest {
    pub id: String,
    pub kind: InstanceKind,
    pub domain_names: Vec<String>,
    pub org_id: Option<String>,
    pub cdn: CdnSettings,
    pub alarm_notification_email: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceRequest {
    pub fn new<I, S>(id: impl Into<String>, kind: InstanceKind, domain_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: id.into(),
            kind,
            domain_names: domain_names
                .into_iter()
                .map(|domain| domain.as_ref().to_string())
                .collect(),
            org_id: None,
            cdn: CdnSettings::default(),
            alarm_notification_email: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_cdn_settings(mut self, cdn: CdnSettings) -> Self {
        self.cdn = cdn;
        self
    }

    pub fn with_alarm_email(mut self, email: impl Into<String>) -> Self {
        self.alarm_notification_email = Some(email.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Changes an Update applies before its pipeline runs; `None` keeps the
/// current value
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub domain_names: Option<Vec<String>>,
    pub cdn: Option<CdnSettings>,
    pub alarm_notification_email: Option<String>,
}

/// What the API layer reports about an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationStatus {
    pub operation_id: i64,
    pub service_instance_id: String,
    pub action: OperationAction,
    pub state: OperationState,
    pub step_description: Option<String>,
    pub error_message: Option<String>,
    pub canceled: bool,
}

impl From<&Operation> for OperationStatus {
    fn from(operation: &Operation) -> Self {
        Self {
            operation_id: operation.id,
            service_instance_id: operation.service_instance_id.clone(),
            action: operation.action,
            state: operation.state,
            step_description: operation.step_description.clone(),
            error_message: operation.error_message.clone(),
            canceled: operation.is_canceled(),
        }
    }
}

/// Check one normalized domain name for DNS syntax
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(BrokerError::validation(format!("domain name too long: {domain}")));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(BrokerError::validation(format!(
            "domain name must have at least two labels: {domain}"
        )));
    }

    for label in labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(BrokerError::validation(format!("invalid domain name: {domain}")));
        }
    }
    Ok(())
}

fn validated_domains(domains: &[String]) -> Result<Vec<String>> {
    let normalized = normalize_domain_names(domains);
    if normalized.is_empty() {
        return Err(BrokerError::validation("at least one domain name is required"));
    }
    for domain in &normalized {
        validate_domain_name(domain)?;
    }
    Ok(normalized)
}

/// Entry point for the broker API layer
#[derive(Debug, Clone)]
pub struct BrokerService {
    store: Arc<dyn BrokerStore>,
    scheduler: Arc<Scheduler>,
}

impl BrokerService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            store: scheduler.context().store.clone(),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Persist a new service instance after normalizing its domains
    pub async fn create_instance(&self, request: InstanceRequest) -> Result<ServiceInstance> {
        if request.id.trim().is_empty() {
            return Err(BrokerError::validation("service instance id is required"));
        }
        if self.store.get_instance(&request.id).await?.is_some() {
            return Err(BrokerError::validation(format!(
                "service instance {} already exists",
                request.id
            )));
        }
        if request.kind == InstanceKind::DedicatedAlb && request.org_id.is_none() {
            return Err(BrokerError::validation(
                "a dedicated load balancer instance requires an organization",
            ));
        }
        if request.kind == InstanceKind::Migration && request.cdn.distribution_id.is_none() {
            return Err(BrokerError::validation(
                "a migration instance requires the distribution it adopts",
            ));
        }

        let domain_names = validated_domains(&request.domain_names)?;
        let mut instance = ServiceInstance::new(request.id, request.kind, domain_names);
        instance.org_id = request.org_id;
        instance.cdn = request.cdn;
        instance.dedicated_waf.alarm_notification_email = request.alarm_notification_email;
        instance.tags = request.tags;
        self.store.insert_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            kind = %instance.kind,
            domains = instance.domain_names.len(),
            "Service instance created"
        );
        Ok(instance)
    }

    pub async fn get_instance(&self, service_instance_id: &str) -> Result<ServiceInstance> {
        self.store
            .get_instance(service_instance_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("service instance", service_instance_id))
    }

    pub async fn enqueue_provision(&self, service_instance_id: &str) -> Result<Operation> {
        let instance = self.active_instance(service_instance_id).await?;
        self.ensure_idle(&instance).await?;
        self.start(&instance, NewOperation::new(&instance.id, OperationAction::Provision))
            .await
    }

    /// Tear the instance down, canceling whatever is still building it
    pub async fn enqueue_deprovision(&self, service_instance_id: &str) -> Result<Operation> {
        let instance = self.active_instance(service_instance_id).await?;

        for mut live in self.store.live_operations(&instance.id).await? {
            if !live.action.is_cancelable_by_deprovision() {
                return Err(BrokerError::invalid_state(format!(
                    "service instance {} has a {} operation in progress",
                    instance.id, live.action
                )));
            }
            OperationStateMachine::apply(&mut live, &OperationEvent::Cancel)?;
            self.store.update_operation(&live).await?;
            info!(
                operation_id = live.id,
                service_instance_id = %instance.id,
                action = %live.action,
                "Operation canceled by deprovision"
            );
        }

        self.start(&instance, NewOperation::new(&instance.id, OperationAction::Deprovision))
            .await
    }

    /// Apply new settings and rotate onto them
    pub async fn enqueue_update(
        &self,
        service_instance_id: &str,
        request: UpdateRequest,
    ) -> Result<Operation> {
        let mut instance = self.active_instance(service_instance_id).await?;
        self.ensure_idle(&instance).await?;

        if let Some(domains) = &request.domain_names {
            instance.domain_names = validated_domains(domains)?;
        }
        if let Some(cdn) = request.cdn {
            if !instance.kind.is_cdn() {
                return Err(BrokerError::validation(format!(
                    "CDN settings do not apply to a {} instance",
                    instance.kind
                )));
            }
            // The distribution linkage is not the caller's to change
            instance.cdn = CdnSettings {
                distribution_id: instance.cdn.distribution_id.clone(),
                distribution_arn: instance.cdn.distribution_arn.clone(),
                ..cdn
            };
        }
        if request.alarm_notification_email.is_some() {
            instance.dedicated_waf.alarm_notification_email = request.alarm_notification_email;
        }
        self.store.update_instance(&instance).await?;

        self.start(&instance, NewOperation::new(&instance.id, OperationAction::Update))
            .await
    }

    pub async fn enqueue_renew(&self, service_instance_id: &str) -> Result<Operation> {
        let instance = self.active_instance(service_instance_id).await?;
        self.ensure_idle(&instance).await?;
        self.start(&instance, NewOperation::new(&instance.id, OperationAction::Renew))
            .await
    }

    /// Move the instance to another plan; `org_id` is required when the
    /// target is a dedicated load balancer and none is recorded yet
    pub async fn enqueue_plan_migration(
        &self,
        service_instance_id: &str,
        target: InstanceKind,
        org_id: Option<String>,
    ) -> Result<Operation> {
        let mut instance = self.active_instance(service_instance_id).await?;
        self.ensure_idle(&instance).await?;

        // Reject unsupported pairs before anything is persisted
        pipeline_for(OperationAction::PlanMigration, instance.kind, Some(target))?;

        if target == InstanceKind::DedicatedAlb {
            if instance.org_id.is_none() {
                instance.org_id = org_id;
            }
            if instance.org_id.is_none() {
                return Err(BrokerError::validation(
                    "a dedicated load balancer instance requires an organization",
                ));
            }
            self.store.update_instance(&instance).await?;
        }

        self.start(
            &instance,
            NewOperation::new(&instance.id, OperationAction::PlanMigration).with_migration_target(target),
        )
        .await
    }

    /// Stop an operation at its next step boundary
    pub async fn cancel(&self, operation_id: i64) -> Result<Operation> {
        let mut operation = self.load_operation(operation_id).await?;
        OperationStateMachine::apply(&mut operation, &OperationEvent::Cancel)?;
        self.store.update_operation(&operation).await?;

        log_pipeline_operation(
            operation.id,
            &operation.service_instance_id,
            operation.action.as_str(),
            "canceled",
            None,
        );
        Ok(operation)
    }

    /// Human-readable progress of an operation
    pub async fn get_step_description(&self, operation_id: i64) -> Result<Option<String>> {
        Ok(self.load_operation(operation_id).await?.step_description)
    }

    pub async fn get_operation_state(&self, operation_id: i64) -> Result<OperationState> {
        Ok(self.load_operation(operation_id).await?.state)
    }

    pub async fn operation_status(&self, operation_id: i64) -> Result<OperationStatus> {
        let operation = self.load_operation(operation_id).await?;
        Ok(OperationStatus::from(&operation))
    }

    async fn load_operation(&self, operation_id: i64) -> Result<Operation> {
        self.store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("operation", operation_id))
    }

    async fn active_instance(&self, service_instance_id: &str) -> Result<ServiceInstance> {
        let instance = self.get_instance(service_instance_id).await?;
        if instance.is_deactivated() {
            return Err(BrokerError::invalid_state(format!(
                "service instance {} is deprovisioned",
                instance.id
            )));
        }
        Ok(instance)
    }

    async fn ensure_idle(&self, instance: &ServiceInstance) -> Result<()> {
        if let Some(live) = self.store.live_operations(&instance.id).await?.first() {
            return Err(BrokerError::invalid_state(format!(
                "service instance {} already has operation {} in progress",
                instance.id, live.id
            )));
        }
        Ok(())
    }

    async fn start(&self, instance: &ServiceInstance, new_operation: NewOperation) -> Result<Operation> {
        let pipeline = pipeline_for(new_operation.action, instance.kind, new_operation.migration_target)?;

        // changes a failed or canceled operation never waited out
        if !instance.route53_change_ids.is_empty() {
            let mut instance = instance.clone();
            debug!(
                service_instance_id = %instance.id,
                dropped = instance.route53_change_ids.len(),
                "Dropping DNS changes of an earlier operation"
            );
            instance.route53_change_ids.clear();
            self.store.update_instance(&instance).await?;
        }

        let operation = self.store.insert_operation(new_operation).await?;
        self.scheduler.enqueue_pipeline(&operation, &pipeline).await?;

        info!(
            operation_id = operation.id,
            service_instance_id = %instance.id,
            action = %operation.action,
            steps = pipeline.len(),
            "Operation started"
        );
        Ok(operation)
    }
}
