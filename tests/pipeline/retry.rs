use std::time::Duration;

use domain_broker::adapters::{DnsProvider, DnsRecord};
use domain_broker::constants::step_descriptions;
use domain_broker::database::BrokerStore;
use domain_broker::error::{AdapterError, BrokerError};
use domain_broker::pipeline::{StepId, StepRegistry};
use domain_broker::models::InstanceKind;
use domain_broker::scheduler::{JobOutcome, TaskQueue};
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::{test_config, TestHarness};
use tokio::time::Instant;

use super::{request, DOMAINS};

#[tokio::test]
async fn test_retry_budget_is_initial_attempt_plus_retries() {
    let harness = TestHarness::new().unwrap();
    let budget = harness.config.retry.standard_max_retries as usize;
    harness.cloud.log.fail_always(
        "certificate_store.upload",
        AdapterError::transient("certificate store", "throttled"),
    );

    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();

    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(harness.cloud.log.count("certificate_store.upload"), budget + 1);
    assert_eq!(
        operation.step_description.as_deref(),
        Some(step_descriptions::UPLOAD_CERTIFICATE)
    );
    assert!(operation.error_message.unwrap().contains("throttled"));
    assert_eq!(harness.cloud.log.count("load_balancer.add_listener_certificate"), 0);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let harness = TestHarness::new().unwrap();
    for _ in 0..2 {
        harness
            .cloud
            .log
            .fail_next("acme.submit_order", AdapterError::transient("acme", "timeout"));
    }

    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(harness.cloud.log.count("acme.submit_order"), 3);
}

#[tokio::test]
async fn test_rejected_order_fails_without_retry() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.log.fail_always(
        "acme.finalize_and_poll",
        AdapterError::rejected("acme", "rate limited for this domain set"),
    );

    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(harness.cloud.log.count("acme.finalize_and_poll"), 1);
}

#[tokio::test]
async fn test_wait_steps_use_fast_budget() {
    let mut config = test_config();
    config.dns.change_max_attempts = 1;
    let harness = TestHarness::with_config(config).unwrap();
    harness.cloud.dns.set_pending_polls(100);

    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(
        operation.step_description.as_deref(),
        Some(step_descriptions::WAIT_FOR_DNS)
    );
    let fast_budget = harness.config.retry.fast_max_retries as usize;
    assert_eq!(harness.cloud.log.count("dns.change_status"), fast_budget + 1);
}

#[tokio::test]
async fn test_new_operation_resubmits_dns_changes_of_a_failed_one() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.dns.set_pending_polls(100);

    let failed = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    assert_eq!(failed.state, OperationState::Failed);
    let stale = harness.instance("4321").await.unwrap().route53_change_ids;
    assert_eq!(stale.len(), 1);

    harness.cloud.dns.set_pending_polls(0);
    let retry = harness.broker.enqueue_provision("4321").await.unwrap();
    assert!(harness.instance("4321").await.unwrap().route53_change_ids.is_empty());
    harness.run_until_idle().await.unwrap();

    assert_eq!(
        harness.operation(retry.id).await.unwrap().state,
        OperationState::Succeeded
    );
    assert_eq!(harness.cloud.log.count("dns.upsert_records"), 2 + DOMAINS.len());
}

#[tokio::test(start_paused = true)]
async fn test_dns_wait_shares_one_budget_across_changes() {
    let mut config = test_config();
    config.dns.change_poll_interval_ms = 1_000;
    config.dns.change_max_attempts = 3;
    let harness = TestHarness::with_config(config).unwrap();
    harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();
    let operation = harness.broker.enqueue_renew("4321").await.unwrap();

    let dns = &harness.cloud.dns;
    let submit = move |name: &'static str| async move {
        dns.upsert_records("ZTEST", &[DnsRecord::txt(name, "token", 60)])
            .await
            .unwrap()
    };
    let in_sync = submit("a.domains.example.net").await;
    dns.set_pending_polls(2);
    let slow = [
        submit("b.domains.example.net").await,
        submit("c.domains.example.net").await,
    ];
    dns.set_pending_polls(100);
    let stuck = submit("d.domains.example.net").await;

    // waited out one after another the slow changes alone would take 4s
    let mut instance = harness.instance("4321").await.unwrap();
    instance.route53_change_ids = vec![in_sync, slow[0].clone(), slow[1].clone(), stuck.clone()];
    harness.store.update_instance(&instance).await.unwrap();

    let wait = StepRegistry::standard().get(StepId::WaitForDnsChanges).unwrap();
    let started = Instant::now();
    let result = wait.execute(harness.context(), &operation).await;

    assert!(matches!(result, Err(BrokerError::PollTimeout { attempts: 3, .. })));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(harness.instance("4321").await.unwrap().route53_change_ids, vec![stuck]);
}

#[tokio::test]
async fn test_failed_job_reports_outcome() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.log.fail_always(
        "acme.register_account",
        AdapterError::rejected("acme", "terms of service not accepted"),
    );
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Cdn))
        .await
        .unwrap();
    harness.broker.enqueue_provision("4321").await.unwrap();

    let outcomes = harness.run_until_idle().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        JobOutcome::Failed { error, .. } => assert!(error.contains("terms of service")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(harness.queue.len().await.unwrap(), 0);
}
