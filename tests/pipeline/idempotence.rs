use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use domain_broker::adapters::{Cdn, DistributionConfig};
use domain_broker::constants::naming;
use domain_broker::database::BrokerStore;
use domain_broker::models::{Certificate, InstanceKind, OperationAction, ServiceInstance};
use domain_broker::pipeline::{pipeline_for, StepId, StepRegistry};
use domain_broker::reconciliation::sync_dedicated_listeners;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::TestHarness;

use super::request;

/// Persisted state a step may touch, without timestamps
#[derive(Debug, PartialEq)]
struct Snapshot {
    instance: ServiceInstance,
    certificates: Vec<Certificate>,
    challenges: usize,
    stored_certificates: Vec<String>,
    distributions: usize,
    web_acls: Vec<String>,
    alarms: Vec<String>,
    health_checks: Vec<String>,
}

async fn snapshot(harness: &TestHarness, id: &str) -> Snapshot {
    let epoch = DateTime::<Utc>::UNIX_EPOCH;

    let mut instance = harness.instance(id).await.unwrap();
    instance.created_at = epoch;
    instance.updated_at = epoch;

    let mut certificates = harness.certificates(id).await.unwrap();
    let mut challenges = 0;
    for certificate in &mut certificates {
        challenges += harness.store.list_challenges(certificate.id).await.unwrap().len();
        certificate.created_at = epoch;
        certificate.updated_at = epoch;
    }

    Snapshot {
        instance,
        certificates,
        challenges,
        stored_certificates: harness.cloud.certificate_store.names(),
        distributions: harness.cloud.cdn.count(),
        web_acls: harness.cloud.waf.web_acl_names(),
        alarms: harness.cloud.alarms.alarm_names(),
        health_checks: harness.cloud.dns.health_check_ids(),
    }
}

#[tokio::test]
async fn test_every_provision_step_can_run_twice() {
    let registry = StepRegistry::standard();

    for kind in [
        InstanceKind::Alb,
        InstanceKind::DedicatedAlb,
        InstanceKind::Cdn,
        InstanceKind::CdnDedicatedWaf,
    ] {
        let harness = TestHarness::new().unwrap();
        sync_dedicated_listeners(harness.context()).await.unwrap();

        harness
            .broker
            .create_instance(request("4321", kind).with_org("org-1"))
            .await
            .unwrap();
        let operation = harness.broker.enqueue_provision("4321").await.unwrap();
        let pipeline = pipeline_for(OperationAction::Provision, kind, None).unwrap();

        for step_id in pipeline.steps {
            let step = registry.get(step_id).unwrap();

            let current = harness.operation(operation.id).await.unwrap();
            step.execute(harness.context(), &current).await.unwrap();
            let first = snapshot(&harness, "4321").await;

            let current = harness.operation(operation.id).await.unwrap();
            step.execute(harness.context(), &current).await.unwrap();
            let second = snapshot(&harness, "4321").await;

            assert_eq!(first, second, "{step_id} is not idempotent for {kind}");
        }

        assert_eq!(
            harness.operation(operation.id).await.unwrap().state,
            OperationState::Succeeded
        );
        assert_eq!(harness.certificates("4321").await.unwrap().len(), 1);
        assert_eq!(harness.cloud.certificate_store.names().len(), 1);
    }
}

#[tokio::test]
async fn test_rerun_alias_step_keeps_pending_changes() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let operation = harness.broker.enqueue_renew("4321").await.unwrap();
    let alias_records = StepRegistry::standard().get(StepId::CreateAliasRecords).unwrap();
    harness.cloud.log.clear();

    for _ in 0..2 {
        let current = harness.operation(operation.id).await.unwrap();
        alias_records.execute(harness.context(), &current).await.unwrap();
    }

    let pending = harness.instance("4321").await.unwrap().route53_change_ids;
    assert_eq!(pending.len(), 2);
    assert_eq!(harness.cloud.log.count("dns.upsert_records"), 2);
}

#[tokio::test]
async fn test_deprovision_can_run_twice() {
    let harness = TestHarness::new().unwrap();
    harness
        .provision(request("4321", InstanceKind::CdnDedicatedWaf))
        .await
        .unwrap();
    let operation = harness.broker.enqueue_deprovision("4321").await.unwrap();
    let pipeline = pipeline_for(OperationAction::Deprovision, InstanceKind::CdnDedicatedWaf, None).unwrap();
    let registry = StepRegistry::standard();

    for _ in 0..2 {
        for step_id in &pipeline.steps {
            let current = harness.operation(operation.id).await.unwrap();
            registry
                .get(*step_id)
                .unwrap()
                .execute(harness.context(), &current)
                .await
                .unwrap();
        }
    }

    assert!(harness.instance("4321").await.unwrap().is_deactivated());
    assert_eq!(harness.cloud.cdn.count(), 0);
}

#[tokio::test]
async fn test_create_distribution_adopts_one_left_by_an_interrupted_run() {
    let harness = TestHarness::new().unwrap();
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Cdn))
        .await
        .unwrap();
    let operation = harness.broker.enqueue_provision("4321").await.unwrap();
    let pipeline = pipeline_for(OperationAction::Provision, InstanceKind::Cdn, None).unwrap();
    let registry = StepRegistry::standard();
    let split = pipeline.position(StepId::CreateDistribution).unwrap();

    for step_id in &pipeline.steps[..split] {
        let current = harness.operation(operation.id).await.unwrap();
        registry
            .get(*step_id)
            .unwrap()
            .execute(harness.context(), &current)
            .await
            .unwrap();
    }

    // the create reached the CDN but its result was never persisted
    let orphan = harness
        .cloud
        .cdn
        .create_distribution(
            &DistributionConfig {
                caller_reference: naming::distribution_caller_reference("4321", operation.id),
                ..DistributionConfig::default()
            },
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    harness.cloud.log.clear();

    for step_id in &pipeline.steps[split..] {
        let current = harness.operation(operation.id).await.unwrap();
        registry
            .get(*step_id)
            .unwrap()
            .execute(harness.context(), &current)
            .await
            .unwrap();
    }

    assert_eq!(harness.cloud.log.count("cdn.find_distribution"), 1);
    assert_eq!(harness.cloud.cdn.count(), 1);
    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.cdn.distribution_id, Some(orphan.id));
    assert_eq!(instance.domain_internal, Some(orphan.domain_name));
    assert_eq!(
        harness.operation(operation.id).await.unwrap().state,
        OperationState::Succeeded
    );
}
