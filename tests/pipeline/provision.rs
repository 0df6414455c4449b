use domain_broker::adapters::{RecordType, RecordValue};
use domain_broker::constants::step_descriptions;
use domain_broker::database::BrokerStore;
use domain_broker::models::InstanceKind;
use domain_broker::scheduler::JobOutcome;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::{TestHarness, SHARED_LISTENER_ARNS};

use super::{request, DOMAINS};

#[tokio::test]
async fn test_cdn_provision_end_to_end() {
    let harness = TestHarness::new().unwrap();

    let operation = harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.step_description.as_deref(), Some(step_descriptions::COMPLETE));

    let instance = harness.instance("4321").await.unwrap();
    assert!(instance.new_certificate_id.is_none());
    assert!(instance.route53_change_ids.is_empty());

    let current = harness
        .store
        .get_certificate(instance.current_certificate_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let leaf = current.leaf_pem.as_deref().unwrap();
    assert_eq!(leaf.matches("BEGIN CERTIFICATE").count(), 1);
}

#[tokio::test]
async fn test_cdn_provision_leaves_complete_state() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.dns.set_pending_polls(1);
    harness.cloud.cdn.set_deploy_polls(2);

    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    let instance = harness.instance("4321").await.unwrap();

    let certificates = harness.certificates("4321").await.unwrap();
    assert_eq!(certificates.len(), 1);
    let certificate = &certificates[0];
    assert!(certificate.leaf_pem.is_some());
    assert!(certificate.chain_pem().is_some());
    assert!(certificate.expires_at.is_some());
    assert!(certificate.is_uploaded());

    let challenges = harness.store.list_challenges(certificate.id).await.unwrap();
    assert_eq!(challenges.len(), 2);
    assert!(challenges.iter().all(|challenge| challenge.answered));

    let distribution_id = instance.cdn.distribution_id.clone().unwrap();
    assert!(instance.cdn.distribution_arn.is_some());
    let (distribution, config) = harness.cloud.cdn.distribution(&distribution_id).unwrap();
    assert_eq!(config.aliases, DOMAINS.map(String::from).to_vec());
    assert_eq!(config.origin_hostname, "origin.apps.example.net");
    assert_eq!(config.server_certificate_id, certificate.iam_server_certificate_id);
    assert_eq!(instance.domain_internal.as_deref(), Some(distribution.domain_name.as_str()));

    // 2 domains x (A + AAAA) alias records, plus one TXT per domain
    let records = harness.cloud.dns.records();
    let aliases: Vec<_> = records
        .iter()
        .filter(|record| matches!(record.value, RecordValue::Alias { .. }))
        .collect();
    assert_eq!(aliases.len(), 4);
    assert!(aliases.iter().any(|record| record.name == "example.com.domains.example.net"
        && record.record_type == RecordType::Aaaa));
    assert!(harness
        .cloud
        .dns
        .has_record("_acme-challenge.foo.com.domains.example.net"));

    // change ids were recorded, waited on and cleared
    assert!(harness.cloud.log.count("dns.change_status") >= 4);
    assert!(instance.route53_change_ids.is_empty());
}

#[tokio::test]
async fn test_alb_provision_attaches_to_least_loaded_listener() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.load_balancer.fill(SHARED_LISTENER_ARNS[0], 5);

    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);

    let instance = harness.instance("4321").await.unwrap();
    assert_eq!(instance.alb.alb_listener_arn.as_deref(), Some(SHARED_LISTENER_ARNS[1]));
    assert_eq!(instance.domain_internal.as_deref(), Some("shared-1.elb.test"));
    assert_eq!(instance.route53_alias_hosted_zone.as_deref(), Some("ZALBTEST"));

    let certificate = harness
        .store
        .get_certificate(instance.current_certificate_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let attached = harness.cloud.load_balancer.certificates(SHARED_LISTENER_ARNS[1]);
    assert_eq!(attached, vec![certificate.iam_server_certificate_arn.clone().unwrap()]);

    let name = certificate.iam_server_certificate_name.unwrap();
    assert!(certificate.iam_server_certificate_arn.unwrap().contains("/alb/external-domains/"));
    let tags = harness.cloud.certificate_store.tags(&name).unwrap();
    assert_eq!(tags.get("service_instance_id").map(String::as_str), Some("4321"));
    assert_eq!(tags.get("environment").map(String::as_str), Some("test"));
}

#[tokio::test]
async fn test_cdn_dedicated_waf_provision_creates_protection_resources() {
    let harness = TestHarness::new().unwrap();

    let operation = harness
        .provision(request("4321", InstanceKind::CdnDedicatedWaf).with_alarm_email("owner@example.com"))
        .await
        .unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);

    let instance = harness.instance("4321").await.unwrap();
    let waf = &instance.dedicated_waf;
    assert_eq!(waf.web_acl_name.as_deref(), Some("test-broker-cdn-4321"));
    assert_eq!(waf.health_checks.len(), 2);
    assert_eq!(waf.health_check_alarms.len(), 2);
    assert!(waf.ddos_detected_alarm_name.is_some());
    // no protection exists for the fresh distribution
    assert!(waf.shield_association.is_none());

    let topic = waf.sns_notification_topic_arn.clone().unwrap();
    assert_eq!(
        harness.cloud.notifications.subscribers(&topic),
        vec!["owner@example.com".to_string()]
    );

    let (_, config) = harness
        .cloud
        .cdn
        .distribution(instance.cdn.distribution_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(config.web_acl_arn, waf.web_acl_arn);
    assert_eq!(harness.cloud.alarms.alarm_names().len(), 3);
}

#[tokio::test]
async fn test_step_description_tracks_progress() {
    let harness = TestHarness::new().unwrap();
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Alb))
        .await
        .unwrap();
    let operation = harness.broker.enqueue_provision("4321").await.unwrap();
    assert_eq!(harness.broker.get_step_description(operation.id).await.unwrap(), None);

    let outcome = harness.scheduler.run_next().await.unwrap().unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }));
    assert_eq!(
        harness.broker.get_step_description(operation.id).await.unwrap().as_deref(),
        Some(step_descriptions::REGISTER_ACME_USER)
    );
    assert_eq!(
        harness.broker.get_operation_state(operation.id).await.unwrap(),
        OperationState::InProgress
    );

    harness.run_until_idle().await.unwrap();
    let status = harness.broker.operation_status(operation.id).await.unwrap();
    assert_eq!(status.state, OperationState::Succeeded);
    assert_eq!(status.step_description.as_deref(), Some(step_descriptions::COMPLETE));
    assert!(status.error_message.is_none());
}

#[tokio::test]
async fn test_acme_account_is_reused_across_operations() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();

    let renew = harness.broker.enqueue_renew("4321").await.unwrap();
    harness.run_until_idle().await.unwrap();

    assert_eq!(harness.operation(renew.id).await.unwrap().state, OperationState::Succeeded);
    assert_eq!(harness.cloud.log.count("acme.register_account"), 1);
}
