use domain_broker::broker::UpdateRequest;
use domain_broker::database::BrokerStore;
use domain_broker::error::AdapterError;
use domain_broker::models::InstanceKind;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::TestHarness;

use super::request;

#[tokio::test]
async fn test_alb_renew_replaces_certificate_on_listener() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let before = harness.instance("4321").await.unwrap();
    let old = harness.certificates("4321").await.unwrap().remove(0);

    let renew = harness.broker.enqueue_renew("4321").await.unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(harness.operation(renew.id).await.unwrap().state, OperationState::Succeeded);

    let after = harness.instance("4321").await.unwrap();
    assert!(after.new_certificate_id.is_none());
    assert_ne!(after.current_certificate_id, before.current_certificate_id);

    let certificates = harness.certificates("4321").await.unwrap();
    assert_eq!(certificates.len(), 1);
    let current = &certificates[0];
    assert_eq!(Some(current.id), after.current_certificate_id);

    let listener = after.alb.alb_listener_arn.as_deref().unwrap();
    assert_eq!(
        harness.cloud.load_balancer.certificates(listener),
        vec![current.iam_server_certificate_arn.clone().unwrap()]
    );
    assert!(!harness
        .cloud
        .certificate_store
        .contains(old.iam_server_certificate_name.as_deref().unwrap()));
    assert_eq!(harness.cloud.certificate_store.names().len(), 1);
}

#[tokio::test]
async fn test_cdn_update_rotates_onto_new_domains() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();

    let update = harness
        .broker
        .enqueue_update(
            "4321",
            UpdateRequest {
                domain_names: Some(vec!["example.com".into(), "bar.com".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(harness.operation(update.id).await.unwrap().state, OperationState::Succeeded);

    let instance = harness.instance("4321").await.unwrap();
    assert!(instance.new_certificate_id.is_none());
    assert!(instance.route53_change_ids.is_empty());

    let certificates = harness.certificates("4321").await.unwrap();
    assert_eq!(certificates.len(), 1);
    let mut names = certificates[0].subject_alternative_names.clone();
    names.sort();
    assert_eq!(names, vec!["bar.com".to_string(), "example.com".to_string()]);

    let (_, config) = harness
        .cloud
        .cdn
        .distribution(instance.cdn.distribution_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(config.server_certificate_id, certificates[0].iam_server_certificate_id);
    assert!(config.aliases.contains(&"bar.com".to_string()));
    assert!(harness.cloud.dns.has_record("bar.com.domains.example.net"));
    assert_eq!(harness.cloud.certificate_store.names().len(), 1);
}

#[tokio::test]
async fn test_update_with_same_domains_keeps_certificate() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let before = harness.certificates("4321").await.unwrap();
    let orders_before = harness.cloud.log.count("acme.submit_order");

    let update = harness
        .broker
        .enqueue_update(
            "4321",
            UpdateRequest {
                domain_names: Some(vec!["FOO.com".into(), "example.com.".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(harness.operation(update.id).await.unwrap().state, OperationState::Succeeded);

    assert_eq!(harness.certificates("4321").await.unwrap(), before);
    assert_eq!(harness.cloud.log.count("acme.submit_order"), orders_before);
    assert_eq!(harness.cloud.log.count("certificate_store.upload"), 1);
}

#[tokio::test]
async fn test_cdn_update_settings_reach_distribution() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    let distribution_id = harness.instance("4321").await.unwrap().cdn.distribution_id.unwrap();

    let mut settings = harness.instance("4321").await.unwrap().cdn;
    settings.origin_hostname = Some("new-origin.example.org".to_string());
    settings.forwarded_headers = vec!["Authorization".to_string()];
    settings.distribution_id = None;

    let update = harness
        .broker
        .enqueue_update(
            "4321",
            UpdateRequest {
                cdn: Some(settings),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(harness.operation(update.id).await.unwrap().state, OperationState::Succeeded);

    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.cdn.distribution_id.as_deref(), Some(distribution_id.as_str()));
    let (_, config) = harness.cloud.cdn.distribution(&distribution_id).unwrap();
    assert_eq!(config.origin_hostname, "new-origin.example.org");
    assert_eq!(config.forwarded_headers, vec!["Authorization".to_string()]);
}

#[tokio::test]
async fn test_rotation_never_points_both_ids_at_one_row() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    harness.broker.enqueue_renew("4321").await.unwrap();

    while harness.scheduler.run_next().await.unwrap().is_some() {
        let instance = harness.store.get_instance("4321").await.unwrap().unwrap();
        if let (Some(current), Some(new)) = (instance.current_certificate_id, instance.new_certificate_id) {
            assert_ne!(current, new);
        }
    }
}

async fn update_domains(harness: &TestHarness, domains: [&str; 2]) -> OperationState {
    let update = harness
        .broker
        .enqueue_update(
            "4321",
            UpdateRequest {
                domain_names: Some(domains.map(String::from).to_vec()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    harness.operation(update.id).await.unwrap().state
}

#[tokio::test]
async fn test_update_after_failed_update_issues_for_new_domains() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();

    harness.cloud.log.fail_always(
        "acme.finalize_and_poll",
        AdapterError::rejected("acme", "order invalid"),
    );
    assert_eq!(
        update_domains(&harness, ["example.com", "bar.com"]).await,
        OperationState::Failed
    );
    let stale = harness.instance("4321").await.unwrap().new_certificate_id;
    assert!(stale.is_some());

    harness.cloud.log.stop_failing("acme.finalize_and_poll");
    assert_eq!(
        update_domains(&harness, ["example.com", "baz.com"]).await,
        OperationState::Succeeded
    );

    let instance = harness.instance("4321").await.unwrap();
    assert!(instance.new_certificate_id.is_none());
    let certificates = harness.certificates("4321").await.unwrap();
    assert_eq!(certificates.len(), 1);
    assert_ne!(Some(certificates[0].id), stale);
    assert_eq!(Some(certificates[0].id), instance.current_certificate_id);

    let mut names = certificates[0].subject_alternative_names.clone();
    names.sort();
    assert_eq!(names, vec!["baz.com".to_string(), "example.com".to_string()]);

    let (_, config) = harness
        .cloud
        .cdn
        .distribution(instance.cdn.distribution_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(config.server_certificate_id, certificates[0].iam_server_certificate_id);
}
