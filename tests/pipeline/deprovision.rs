use domain_broker::models::InstanceKind;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::TestHarness;

use super::request;

async fn deprovision(harness: &TestHarness, id: &str) -> OperationState {
    let operation = harness.broker.enqueue_deprovision(id).await.unwrap();
    harness.run_until_idle().await.unwrap();
    harness.operation(operation.id).await.unwrap().state
}

#[tokio::test]
async fn test_cdn_deprovision_removes_everything() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();

    assert_eq!(deprovision(&harness, "4321").await, OperationState::Succeeded);

    let instance = harness.instance("4321").await.unwrap();
    assert!(instance.is_deactivated());
    assert!(instance.current_certificate_id.is_none());
    assert!(instance.cdn.distribution_id.is_none());
    assert!(harness.certificates("4321").await.unwrap().is_empty());
    assert_eq!(harness.cloud.cdn.count(), 0);
    assert!(harness.cloud.certificate_store.names().is_empty());
    assert!(harness.cloud.dns.records().is_empty());
}

#[tokio::test]
async fn test_deprovision_tolerates_resources_deleted_out_of_band() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    let instance = harness.instance("4321").await.unwrap();

    harness
        .cloud
        .cdn
        .remove(instance.cdn.distribution_id.as_deref().unwrap());
    for name in harness.cloud.certificate_store.names() {
        harness.cloud.certificate_store.remove(&name);
    }
    harness.cloud.dns.clear_records();

    assert_eq!(deprovision(&harness, "4321").await, OperationState::Succeeded);
    let instance = harness.instance("4321").await.unwrap();
    assert!(instance.deactivated_at.is_some());
    assert!(harness.certificates("4321").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alb_deprovision_detaches_certificate() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let listener = harness
        .instance("4321")
        .await
        .unwrap()
        .alb
        .alb_listener_arn
        .unwrap();
    assert_eq!(harness.cloud.load_balancer.certificates(&listener).len(), 1);

    assert_eq!(deprovision(&harness, "4321").await, OperationState::Succeeded);
    assert!(harness.cloud.load_balancer.certificates(&listener).is_empty());
    assert!(harness.cloud.certificate_store.names().is_empty());
    assert!(harness.instance("4321").await.unwrap().is_deactivated());
}

#[tokio::test]
async fn test_dedicated_waf_deprovision_removes_monitoring() {
    let harness = TestHarness::new().unwrap();
    harness
        .provision(request("4321", InstanceKind::CdnDedicatedWaf))
        .await
        .unwrap();
    assert!(!harness.cloud.dns.health_check_ids().is_empty());

    assert_eq!(deprovision(&harness, "4321").await, OperationState::Succeeded);

    assert!(harness.cloud.alarms.alarm_names().is_empty());
    assert!(harness.cloud.notifications.topic_arns().is_empty());
    assert!(harness.cloud.dns.health_check_ids().is_empty());
    assert!(harness.cloud.waf.web_acl_names().is_empty());
    assert_eq!(harness.cloud.cdn.count(), 0);

    let waf = harness.instance("4321").await.unwrap().dedicated_waf;
    assert!(waf.health_checks.is_empty());
    assert!(waf.web_acl_arn.is_none());
}

#[tokio::test]
async fn test_deprovisioned_instance_rejects_new_operations() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(deprovision(&harness, "4321").await, OperationState::Succeeded);

    assert!(harness.broker.enqueue_renew("4321").await.is_err());
    assert!(harness.broker.enqueue_deprovision("4321").await.is_err());
}
