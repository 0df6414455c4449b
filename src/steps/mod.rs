//! # Pipeline Steps
//!
//! Concrete [`Step`](crate::pipeline::Step) implementations, grouped by the
//! external system they drive. Every step re-reads durable state, checks
//! whether its effect is already recorded, performs the side effect and
//! persists the outcome before returning.

pub mod acme;
pub mod alarms;
pub mod alb;
pub mod cdn;
pub mod certificates;
pub mod dns;
pub mod finalize;
pub mod shield;
pub mod waf;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::tags;
use crate::models::ServiceInstance;
use crate::pipeline::{StepContext, StepRegistry};

/// Register every built-in step
pub fn register_all(registry: &mut StepRegistry) {
    registry
        .register(Arc::new(acme::RegisterAcmeUser))
        .register(Arc::new(acme::GeneratePrivateKey))
        .register(Arc::new(acme::InitiateChallenges))
        .register(Arc::new(acme::AnswerChallenges))
        .register(Arc::new(acme::RetrieveCertificate))
        .register(Arc::new(dns::CreateTxtRecords))
        .register(Arc::new(dns::WaitForDnsChanges))
        .register(Arc::new(dns::CreateAliasRecords))
        .register(Arc::new(dns::RemoveAliasRecords))
        .register(Arc::new(dns::RemoveTxtRecords))
        .register(Arc::new(certificates::UploadCertificate))
        .register(Arc::new(certificates::DeleteOldCertificates))
        .register(Arc::new(certificates::DeleteAllCertificates))
        .register(Arc::new(cdn::CreateDistribution))
        .register(Arc::new(cdn::WaitForDistribution))
        .register(Arc::new(cdn::UpdateDistribution))
        .register(Arc::new(cdn::UpdateDistributionCertificate))
        .register(Arc::new(cdn::DisableDistribution))
        .register(Arc::new(cdn::WaitForDistributionDisabled))
        .register(Arc::new(cdn::DeleteDistribution))
        .register(Arc::new(cdn::AdoptDistribution))
        .register(Arc::new(alb::SelectAlb))
        .register(Arc::new(alb::SelectDedicatedAlb))
        .register(Arc::new(alb::EnsureAlbWebAcl))
        .register(Arc::new(alb::AddCertificateToAlb))
        .register(Arc::new(alb::WaitForCertificatePropagation))
        .register(Arc::new(alb::RemoveOldCertificateFromAlb))
        .register(Arc::new(alb::RemoveCertificateFromAlb))
        .register(Arc::new(waf::CreateWebAcl))
        .register(Arc::new(waf::WaitForWebAcl))
        .register(Arc::new(waf::DeleteWebAcl))
        .register(Arc::new(shield::CreateHealthChecks))
        .register(Arc::new(shield::DeleteHealthChecks))
        .register(Arc::new(shield::AssociateShield))
        .register(Arc::new(shield::DisassociateShield))
        .register(Arc::new(alarms::CreateSnsTopic))
        .register(Arc::new(alarms::SubscribeSnsTopic))
        .register(Arc::new(alarms::DeleteSnsTopic))
        .register(Arc::new(alarms::CreateHealthCheckAlarms))
        .register(Arc::new(alarms::CreateDdosAlarm))
        .register(Arc::new(alarms::DeleteAlarms))
        .register(Arc::new(finalize::SwitchInstanceKind))
        .register(Arc::new(finalize::MarkDeprovisioned))
        .register(Arc::new(finalize::MarkSucceeded));
}

/// Tags for every external resource created on behalf of an instance
///
/// Broker-wide tags first, then the instance's own, then the identifying tags,
/// which always win.
pub(crate) fn resource_tags(ctx: &StepContext, instance: &ServiceInstance) -> BTreeMap<String, String> {
    let mut merged = ctx.config.tags.clone();
    merged.extend(instance.tags.clone());
    merged.insert(tags::SERVICE_INSTANCE_ID.to_string(), instance.id.clone());
    merged.insert(tags::INSTANCE_TYPE.to_string(), instance.kind.as_str().to_string());
    merged.insert(tags::MANAGED_BY.to_string(), tags::MANAGED_BY_VALUE.to_string());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{templates::pipeline_for, StepId};
    use crate::models::{InstanceKind, OperationAction};

    #[test]
    fn test_every_template_step_is_registered() {
        let registry = StepRegistry::standard();

        let mut plans = Vec::new();
        for kind in [
            InstanceKind::Alb,
            InstanceKind::DedicatedAlb,
            InstanceKind::Cdn,
            InstanceKind::CdnDedicatedWaf,
        ] {
            for action in [
                OperationAction::Provision,
                OperationAction::Deprovision,
                OperationAction::Update,
                OperationAction::Renew,
            ] {
                plans.push(pipeline_for(action, kind, None).unwrap());
            }
        }
        plans.push(
            pipeline_for(OperationAction::PlanMigration, InstanceKind::Migration, Some(InstanceKind::Cdn))
                .unwrap(),
        );

        for pipeline in plans {
            for step in &pipeline.steps {
                assert!(registry.contains(*step), "{step} is not registered");
            }
        }
        assert!(registry.contains(StepId::MarkSucceeded));
    }

    #[test]
    fn test_identifying_tags_override_instance_tags() {
        let mut config = crate::test_helpers::test_config();
        config.tags.insert("env".to_string(), "test".to_string());

        let mut instance = ServiceInstance::new("4321", InstanceKind::Cdn, vec!["example.com".into()]);
        instance.tags.insert(tags::SERVICE_INSTANCE_ID.to_string(), "spoofed".to_string());
        instance.tags.insert("team".to_string(), "web".to_string());

        let harness = crate::test_helpers::TestHarness::with_config(config).unwrap();
        let merged = resource_tags(harness.context(), &instance);

        assert_eq!(merged["service_instance_id"], "4321");
        assert_eq!(merged["env"], "test");
        assert_eq!(merged["team"], "web");
        assert_eq!(merged["managed_by"], "domain-broker");
    }
}
