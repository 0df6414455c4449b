use chrono::{Duration, Utc};
use domain_broker::adapters::{CertificateStore, ServerCertificateUpload};
use domain_broker::constants::naming;
use domain_broker::database::BrokerStore;
use domain_broker::models::{InstanceKind, NewCertificate, OperationAction};
use domain_broker::reconciliation::{reconcile_duplicate_certificates, scan_for_expiring_certificates};
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::TestHarness;
use domain_broker::{AdapterError, InstanceRequest};

use super::{request, DOMAINS};

/// Leave certificates behind as an interrupted rotation would: uploaded and
/// still attached to the instance's listener
async fn add_orphaned_certificates(harness: &TestHarness, id: &str, count: usize) {
    let listener = harness.instance(id).await.unwrap().alb.alb_listener_arn.unwrap();

    for _ in 0..count {
        let mut certificate = harness
            .store
            .insert_certificate(NewCertificate {
                service_instance_id: id.to_string(),
                subject_alternative_names: DOMAINS.map(String::from).to_vec(),
                private_key_pem: "encrypted".to_string(),
                csr_pem: "csr".to_string(),
            })
            .await
            .unwrap();
        let name = naming::certificate_name(id, certificate.id);
        let stored = harness
            .cloud
            .certificate_store
            .upload(&ServerCertificateUpload {
                name: &name,
                path: "/alb/external-domains/",
                certificate_body: "leaf",
                private_key: "key",
                certificate_chain: "",
            })
            .await
            .unwrap();
        harness.cloud.load_balancer.attach(&listener, &stored.arn);

        certificate.iam_server_certificate_id = Some(stored.id);
        certificate.iam_server_certificate_name = Some(stored.name);
        certificate.iam_server_certificate_arn = Some(stored.arn);
        harness.store.update_certificate(&certificate).await.unwrap();
    }
}

#[tokio::test]
async fn test_duplicate_certificates_are_removed() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    add_orphaned_certificates(&harness, "4321", 2).await;
    assert_eq!(harness.certificates("4321").await.unwrap().len(), 3);
    harness.cloud.log.clear();

    let report = reconcile_duplicate_certificates(harness.context()).await.unwrap();
    assert_eq!(report.instances_found, 1);
    assert_eq!(report.certificates_deleted, 2);
    assert_eq!(report.listener_detachments, 2);
    assert!(report.failures.is_empty());

    let instance = harness.instance("4321").await.unwrap();
    let remaining = harness.certificates("4321").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(Some(remaining[0].id), instance.current_certificate_id);

    assert_eq!(harness.cloud.log.count("certificate_store.delete"), 2);
    assert_eq!(harness.cloud.log.count("load_balancer.remove_listener_certificate"), 2);
    let listener = instance.alb.alb_listener_arn.unwrap();
    assert_eq!(
        harness.cloud.load_balancer.certificates(&listener),
        vec![remaining[0].iam_server_certificate_arn.clone().unwrap()]
    );
    assert_eq!(harness.cloud.certificate_store.names().len(), 1);

    // a second run finds nothing to do
    harness.cloud.log.clear();
    let rerun = reconcile_duplicate_certificates(harness.context()).await.unwrap();
    assert_eq!(rerun.instances_found, 0);
    assert_eq!(rerun.certificates_deleted, 0);
    assert_eq!(harness.cloud.log.count("certificate_store.delete"), 0);
    assert_eq!(harness.certificates("4321").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_instances_with_running_operations_are_skipped() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    add_orphaned_certificates(&harness, "4321", 2).await;
    harness.broker.enqueue_renew("4321").await.unwrap();

    let report = reconcile_duplicate_certificates(harness.context()).await.unwrap();
    assert_eq!(report.instances_skipped, 1);
    assert_eq!(report.certificates_deleted, 0);
    assert_eq!(harness.certificates("4321").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_delete_keeps_row_and_continues() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    add_orphaned_certificates(&harness, "4321", 2).await;
    harness.cloud.log.fail_next(
        "certificate_store.delete",
        AdapterError::transient("certificate store", "throttled"),
    );

    let report = reconcile_duplicate_certificates(harness.context()).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.certificates_deleted, 1);
    assert_eq!(harness.certificates("4321").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreadable_listeners_do_not_stop_cleanup() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Cdn)).await.unwrap();
    harness.provision(request("8765", InstanceKind::Alb)).await.unwrap();
    add_orphaned_certificates(&harness, "8765", 1).await;

    let mut stale = harness
        .store
        .insert_certificate(NewCertificate {
            service_instance_id: "4321".to_string(),
            subject_alternative_names: DOMAINS.map(String::from).to_vec(),
            private_key_pem: "encrypted".to_string(),
            csr_pem: "csr".to_string(),
        })
        .await
        .unwrap();
    stale.iam_server_certificate_name = Some("stale-cdn-certificate".to_string());
    stale.iam_server_certificate_arn = Some("arn:aws:iam::000000000000:server-certificate/stale".to_string());
    harness.store.update_certificate(&stale).await.unwrap();

    harness.cloud.log.fail_always(
        "load_balancer.list_listener_certificates",
        AdapterError::transient("load balancer", "throttled"),
    );
    harness.cloud.log.clear();

    let report = reconcile_duplicate_certificates(harness.context()).await.unwrap();
    assert_eq!(report.instances_found, 2);
    assert_eq!(report.certificates_deleted, 2);
    assert_eq!(report.listener_detachments, 0);
    assert!(report.failures.is_empty());
    assert_eq!(harness.cloud.log.count("load_balancer.list_listener_certificates"), 1);
    assert_eq!(harness.certificates("4321").await.unwrap().len(), 1);
    assert_eq!(harness.certificates("8765").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expiring_certificates_are_renewed() {
    let harness = TestHarness::new().unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    harness
        .provision(InstanceRequest::new("9999", InstanceKind::Cdn, ["other.example.org"]))
        .await
        .unwrap();

    let mut expiring = harness.certificates("4321").await.unwrap().remove(0);
    expiring.expires_at = Some(Utc::now() + Duration::days(10));
    harness.store.update_certificate(&expiring).await.unwrap();

    let operations = scan_for_expiring_certificates(&harness.broker).await.unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].service_instance_id, "4321");
    assert_eq!(operations[0].action, OperationAction::Renew);

    // already renewing
    assert!(scan_for_expiring_certificates(&harness.broker)
        .await
        .unwrap()
        .is_empty());

    harness.run_until_idle().await.unwrap();
    assert_eq!(
        harness.operation(operations[0].id).await.unwrap().state,
        OperationState::Succeeded
    );
    let renewed = harness.certificates("4321").await.unwrap();
    assert_eq!(renewed.len(), 1);
    assert_ne!(renewed[0].id, expiring.id);
    assert!(scan_for_expiring_certificates(&harness.broker)
        .await
        .unwrap()
        .is_empty());
}

