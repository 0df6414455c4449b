use domain_broker::database::BrokerStore;
use domain_broker::models::InstanceKind;
use domain_broker::reconciliation::sync_dedicated_listeners;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::{TestHarness, DEDICATED_ALB_ARN, DEDICATED_LISTENER_ARNS};

use super::request;

#[tokio::test]
async fn test_listener_sync_records_pool_once() {
    let harness = TestHarness::new().unwrap();

    let report = sync_dedicated_listeners(harness.context()).await.unwrap();
    assert_eq!(report.albs_scanned, 1);
    assert_eq!(report.listeners_added, 2);
    assert_eq!(report.listeners_bound, 0);

    let again = sync_dedicated_listeners(harness.context()).await.unwrap();
    assert_eq!(again.listeners_added, 0);
    assert_eq!(harness.store.list_dedicated_listeners().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unbound_listener_inherits_alb_org() {
    let harness = TestHarness::new().unwrap();
    harness
        .store
        .ensure_dedicated_alb(DEDICATED_ALB_ARN, Some("org-1"))
        .await
        .unwrap();

    let report = sync_dedicated_listeners(harness.context()).await.unwrap();
    assert_eq!(report.listeners_added, 2);
    let listeners = harness.store.list_dedicated_listeners().await.unwrap();
    assert!(listeners
        .iter()
        .all(|listener| listener.dedicated_org.as_deref() == Some("org-1")));
}

#[tokio::test]
async fn test_organizations_get_their_own_listeners() {
    let harness = TestHarness::new().unwrap();
    sync_dedicated_listeners(harness.context()).await.unwrap();

    for (id, org) in [("a-1", "org-a"), ("a-2", "org-a"), ("b-1", "org-b")] {
        let operation = harness
            .provision(request(id, InstanceKind::DedicatedAlb).with_org(org))
            .await
            .unwrap();
        assert_eq!(operation.state, OperationState::Succeeded, "{id}");
    }

    let listener_of = |instance: domain_broker::models::ServiceInstance| instance.alb.alb_listener_arn.unwrap();
    let a1 = listener_of(harness.instance("a-1").await.unwrap());
    let a2 = listener_of(harness.instance("a-2").await.unwrap());
    let b1 = listener_of(harness.instance("b-1").await.unwrap());
    assert_eq!(a1, a2);
    assert_ne!(a1, b1);
    assert!(DEDICATED_LISTENER_ARNS.contains(&b1.as_str()));
    assert_eq!(harness.cloud.load_balancer.certificates(&a1).len(), 2);

    // the pool is exhausted for a third organization
    let operation = harness
        .provision(request("c-1", InstanceKind::DedicatedAlb).with_org("org-c"))
        .await
        .unwrap();
    assert_eq!(operation.state, OperationState::Failed);
    assert!(operation.error_message.unwrap().contains("org-c"));
}

#[tokio::test]
async fn test_dedicated_alb_shares_one_web_acl() {
    let harness = TestHarness::new().unwrap();
    sync_dedicated_listeners(harness.context()).await.unwrap();

    for id in ["a-1", "a-2"] {
        harness
            .provision(request(id, InstanceKind::DedicatedAlb).with_org("org-a"))
            .await
            .unwrap();
    }

    assert_eq!(harness.cloud.waf.web_acl_names().len(), 1);
    let alb = harness
        .store
        .get_dedicated_alb(DEDICATED_ALB_ARN)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alb.dedicated_org.as_deref(), Some("org-a"));
    assert_eq!(
        harness.cloud.waf.association(DEDICATED_ALB_ARN),
        alb.dedicated_waf_web_acl_arn
    );
}
