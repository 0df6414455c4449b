use domain_broker::adapters::DistributionConfig;
use domain_broker::models::{CdnSettings, InstanceKind};
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::{
    TestHarness, DEDICATED_ALB_ARN, DEDICATED_LISTENER_ARNS, SHARED_LISTENER_ARNS,
};
use domain_broker::reconciliation::sync_dedicated_listeners;

use super::{request, DOMAINS};

#[tokio::test]
async fn test_cdn_to_dedicated_waf_migration() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    let before = harness.instance("4321").await.unwrap();
    let protection = harness
        .cloud
        .shield
        .protect(before.cdn.distribution_arn.as_deref().unwrap());

    let migration = harness
        .broker
        .enqueue_plan_migration("4321", InstanceKind::CdnDedicatedWaf, None)
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(
        harness.operation(migration.id).await.unwrap().state,
        OperationState::Succeeded
    );

    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.kind, InstanceKind::CdnDedicatedWaf);
    assert_eq!(instance.current_certificate_id, before.current_certificate_id);
    assert_eq!(instance.dedicated_waf.health_checks.len(), 2);

    let association = instance.dedicated_waf.shield_association.clone().unwrap();
    assert_eq!(association.protection_id, protection);
    assert!(harness.cloud.shield.associated_health_check(&protection).is_some());

    let (_, config) = harness
        .cloud
        .cdn
        .distribution(instance.cdn.distribution_id.as_deref().unwrap())
        .unwrap();
    assert!(config.web_acl_arn.is_some());
    assert_eq!(config.web_acl_arn, instance.dedicated_waf.web_acl_arn);
}

#[tokio::test]
async fn test_shared_to_dedicated_alb_migration() {
    let harness = TestHarness::new().unwrap();
    sync_dedicated_listeners(harness.context()).await.unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let shared_listener = harness
        .instance("4321")
        .await
        .unwrap()
        .alb
        .alb_listener_arn
        .unwrap();
    assert!(SHARED_LISTENER_ARNS.contains(&shared_listener.as_str()));

    let migration = harness
        .broker
        .enqueue_plan_migration("4321", InstanceKind::DedicatedAlb, Some("org-1".to_string()))
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(
        harness.operation(migration.id).await.unwrap().state,
        OperationState::Succeeded
    );

    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.kind, InstanceKind::DedicatedAlb);
    assert_eq!(instance.org_id.as_deref(), Some("org-1"));
    let listener = instance.alb.alb_listener_arn.clone().unwrap();
    assert!(DEDICATED_LISTENER_ARNS.contains(&listener.as_str()));
    assert!(instance.alb.previous_alb_listener_arn.is_none());
    assert_eq!(instance.domain_internal.as_deref(), Some("dedicated-1.elb.test"));

    assert!(harness.cloud.load_balancer.certificates(&shared_listener).is_empty());
    assert_eq!(harness.cloud.load_balancer.certificates(&listener).len(), 1);
    assert!(harness.cloud.waf.association(DEDICATED_ALB_ARN).is_some());
}

#[tokio::test]
async fn test_legacy_distribution_is_adopted() {
    let harness = TestHarness::new().unwrap();
    let existing = harness.cloud.cdn.insert_existing(DistributionConfig {
        caller_reference: "legacy".to_string(),
        aliases: DOMAINS.map(String::from).to_vec(),
        origin_hostname: "legacy-origin.example.org".to_string(),
        enabled: true,
        ..DistributionConfig::default()
    });

    harness
        .broker
        .create_instance(
            request("4321", InstanceKind::Migration).with_cdn_settings(CdnSettings {
                distribution_id: Some(existing.id.clone()),
                ..CdnSettings::default()
            }),
        )
        .await
        .unwrap();
    let migration = harness
        .broker
        .enqueue_plan_migration("4321", InstanceKind::Cdn, None)
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(
        harness.operation(migration.id).await.unwrap().state,
        OperationState::Succeeded
    );

    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.kind, InstanceKind::Cdn);
    assert_eq!(instance.cdn.distribution_arn.as_deref(), Some(existing.arn.as_str()));
    assert_eq!(
        instance.cdn.origin_hostname.as_deref(),
        Some("legacy-origin.example.org")
    );
    assert!(instance.current_certificate_id.is_some());
    assert!(instance.new_certificate_id.is_none());

    let (_, config) = harness.cloud.cdn.distribution(&existing.id).unwrap();
    assert!(config.server_certificate_id.is_some());
    assert_eq!(config.origin_hostname, "legacy-origin.example.org");
    assert_eq!(harness.cloud.cdn.count(), 1);
}

#[tokio::test]
async fn test_unsupported_migration_is_rejected() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();

    assert!(harness
        .broker
        .enqueue_plan_migration("4321", InstanceKind::Alb, None)
        .await
        .is_err());
    assert!(harness
        .broker
        .enqueue_plan_migration("4321", InstanceKind::DedicatedAlb, None)
        .await
        .is_err());
}
