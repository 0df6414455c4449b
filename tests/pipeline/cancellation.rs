use domain_broker::error::AdapterError;
use domain_broker::models::InstanceKind;
use domain_broker::scheduler::JobOutcome;
use domain_broker::state_machine::OperationState;
use domain_broker::test_helpers::TestHarness;

use super::request;

#[tokio::test]
async fn test_canceled_operation_runs_no_steps() {
    let harness = TestHarness::new().unwrap();
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Alb))
        .await
        .unwrap();
    let operation = harness.broker.enqueue_provision("4321").await.unwrap();
    harness.broker.cancel(operation.id).await.unwrap();

    let outcomes = harness.run_until_idle().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], JobOutcome::Canceled { .. }));
    assert!(harness.cloud.log.calls().is_empty());

    let status = harness.broker.operation_status(operation.id).await.unwrap();
    assert_eq!(status.state, OperationState::InProgress);
    assert!(status.canceled);
    assert!(status.step_description.is_none());
}

#[tokio::test]
async fn test_deprovision_cancels_running_provision() {
    let harness = TestHarness::new().unwrap();
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Alb))
        .await
        .unwrap();
    let provision = harness.broker.enqueue_provision("4321").await.unwrap();
    harness.scheduler.run_next().await.unwrap();

    let deprovision = harness.broker.enqueue_deprovision("4321").await.unwrap();
    harness.run_until_idle().await.unwrap();

    let provision = harness.operation(provision.id).await.unwrap();
    assert_eq!(provision.state, OperationState::InProgress);
    assert!(provision.is_canceled());
    assert_eq!(harness.cloud.log.count("acme.submit_order"), 0);

    let deprovision = harness.operation(deprovision.id).await.unwrap();
    assert_eq!(deprovision.state, OperationState::Succeeded);
    assert!(harness.instance("4321").await.unwrap().is_deactivated());
}

#[tokio::test]
async fn test_failure_after_cancel_does_not_fail_operation() {
    let harness = TestHarness::new().unwrap();
    harness.cloud.log.fail_always(
        "certificate_store.upload",
        AdapterError::transient("certificate store", "throttled"),
    );
    harness
        .broker
        .create_instance(request("4321", InstanceKind::Alb))
        .await
        .unwrap();
    let operation = harness.broker.enqueue_provision("4321").await.unwrap();

    loop {
        let outcome = harness.scheduler.run_next().await.unwrap().unwrap();
        if matches!(outcome, JobOutcome::Retrying { .. }) {
            break;
        }
    }
    harness.broker.cancel(operation.id).await.unwrap();

    let outcomes = harness.run_until_idle().await.unwrap();
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, JobOutcome::Canceled { .. })));

    let operation = harness.operation(operation.id).await.unwrap();
    assert_eq!(operation.state, OperationState::InProgress);
    assert!(operation.error_message.is_some());
    assert_eq!(harness.cloud.log.count("certificate_store.upload"), 1);
}

#[tokio::test]
async fn test_finished_operation_cannot_be_canceled() {
    let harness = TestHarness::new().unwrap();
    let operation = harness.provision(request("4321", InstanceKind::Alb)).await.unwrap();

    assert!(harness.broker.cancel(operation.id).await.is_err());
    assert_eq!(
        harness.broker.get_operation_state(operation.id).await.unwrap(),
        OperationState::Succeeded
    );
}
