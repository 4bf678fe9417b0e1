//! Deployment Integration Tests
//!
//! End-to-end deploys against the in-memory stack service.

mod common;

use common::{at, deployer, memory_api, request, SharedBuffer};

use stackctl::adapters::memory::{Operation, ReviewScript};
use stackctl::adapters::RolloutStatus;
use stackctl::core::{ChangeSetError, DeployError, DeployOutcome};
use stackctl::domain::{Change, ChangeAction, ChangeSetType, Stack, StackEvent, StackStatus};

fn queue_added() -> ReviewScript {
    ReviewScript::changes(vec![Change::new(
        "Queue",
        "AWS::SQS::Queue",
        ChangeAction::Add,
    )])
}

#[tokio::test]
async fn test_no_changes_skips_execution_and_status_polling() {
    let reasons = [
        "The submitted information didn't contain changes. Submit different information to create a change set.",
        "No updates are to be performed.",
    ];

    for reason in reasons {
        let api = memory_api();
        api.put_stack(Stack::new("demo", StackStatus::UpdateComplete));
        api.script_review(ReviewScript::unavailable(reason));

        let mut req = request("demo");
        req.intent = ChangeSetType::Update;

        let outcome = deployer(&api).deploy(&req, SharedBuffer::default()).await.unwrap();

        assert!(matches!(outcome, DeployOutcome::NoChanges), "{reason}");
        assert_eq!(api.calls(Operation::ExecuteChangeSet), 0, "{reason}");
        assert_eq!(api.calls(Operation::DescribeStack), 0, "{reason}");
        assert_eq!(api.calls(Operation::DescribeStackEvents), 0, "{reason}");
    }
}

#[tokio::test]
async fn test_nested_stack_resources_render_under_parent() {
    let api = memory_api();
    api.script_review(ReviewScript::changes(vec![Change::new(
        "AddonsStack",
        "AWS::CloudFormation::Stack",
        ChangeAction::Add,
    )]));
    api.script_statuses(
        "demo",
        vec![StackStatus::CreateInProgress, StackStatus::CreateComplete],
    );

    let nested_id = "arn:stack/demo-AddonsStack-1ABC/uuid";
    api.push_event(
        "demo",
        StackEvent::new("r1", "AddonsStack", "AWS::CloudFormation::Stack", "CREATE_IN_PROGRESS", at(1))
            .with_physical_id(nested_id),
    );
    api.push_event(
        "demo",
        StackEvent::new("r2", "AddonsStack", "AWS::CloudFormation::Stack", "CREATE_COMPLETE", at(4))
            .with_physical_id(nested_id),
    );
    api.push_event(
        "demo",
        StackEvent::new("r3", "demo", "AWS::CloudFormation::Stack", "CREATE_COMPLETE", at(5))
            .with_physical_id("demo"),
    );
    api.push_event(
        nested_id,
        StackEvent::new(
            "n0",
            "demo-AddonsStack-1ABC",
            "AWS::CloudFormation::Stack",
            "CREATE_IN_PROGRESS",
            at(1),
        )
        .with_physical_id(nested_id),
    );
    api.push_event(
        nested_id,
        StackEvent::new("n1", "MyTable", "AWS::DynamoDB::Table", "CREATE_IN_PROGRESS", at(2)),
    );
    api.push_event(
        nested_id,
        StackEvent::new("n2", "MyTable", "AWS::DynamoDB::Table", "CREATE_COMPLETE", at(3))
            .with_physical_id("demo-MyTable-XYZ"),
    );

    let out = SharedBuffer::default();
    let outcome = deployer(&api).deploy(&request("demo"), out.clone()).await.unwrap();

    let DeployOutcome::Deployed {
        status,
        tree,
        stream_error,
    } = outcome
    else {
        panic!("expected a deployment");
    };

    assert_eq!(status, StackStatus::CreateComplete);
    assert!(stream_error.is_none());
    assert_eq!(tree.root().status, "CREATE_COMPLETE");
    assert_eq!(tree.find(&["AddonsStack"]).unwrap().status, "CREATE_COMPLETE");
    assert_eq!(
        tree.find(&["AddonsStack", "MyTable"]).unwrap().status,
        "CREATE_COMPLETE"
    );
    assert!(tree.find(&["MyTable"]).is_none());

    let printed = out.contents();
    assert!(printed.starts_with("Proposed changes for stack demo:\n  + AddonsStack"));
    assert!(printed.contains("    MyTable CREATE_COMPLETE"));
}

#[tokio::test]
async fn test_failed_stack_reports_first_failing_resource() {
    let api = memory_api();
    api.script_review(queue_added());
    api.script_statuses(
        "demo",
        vec![StackStatus::CreateInProgress, StackStatus::RollbackComplete],
    );
    api.set_rollout(
        "prod",
        "api",
        RolloutStatus {
            state: "FAILED".to_string(),
            running_count: 0,
            desired_count: 2,
            failed_tasks: 2,
            reason: Some("essential container exited".to_string()),
        },
    );

    api.push_event(
        "demo",
        StackEvent::new("e1", "Queue", "AWS::SQS::Queue", "CREATE_COMPLETE", at(1)),
    );
    api.push_event(
        "demo",
        StackEvent::new("e2", "Service", "AWS::ECS::Service", "CREATE_FAILED", at(2))
            .with_physical_id("arn:aws:ecs:eu-west-1:1234:service/prod/api")
            .with_reason("resource limit exceeded"),
    );
    api.push_event(
        "demo",
        StackEvent::new("e3", "Queue", "AWS::SQS::Queue", "DELETE_FAILED", at(3))
            .with_reason("queue in use"),
    );
    api.push_event(
        "demo",
        StackEvent::new("e4", "demo", "AWS::CloudFormation::Stack", "ROLLBACK_COMPLETE", at(4)),
    );

    let out = SharedBuffer::default();
    let err = deployer(&api)
        .with_resolver(api.clone())
        .deploy(&request("demo"), out.clone())
        .await
        .unwrap_err();

    match &err {
        DeployError::StackFailed {
            stack,
            status,
            logical_id,
            reason,
        } => {
            assert_eq!(stack, "demo");
            assert_eq!(*status, StackStatus::RollbackComplete);
            assert_eq!(logical_id, "Service");
            assert_eq!(reason, "resource limit exceeded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("resource limit exceeded"));
    assert!(out
        .contents()
        .contains("rollout FAILED (0/2 running, 2 failed tasks): essential container exited"));
}

#[tokio::test]
async fn test_existing_stack_falls_back_to_update() {
    let api = memory_api();
    api.put_stack(Stack::new("demo", StackStatus::CreateComplete));
    api.script_review(queue_added());
    api.script_statuses(
        "demo",
        vec![StackStatus::UpdateInProgress, StackStatus::UpdateComplete],
    );

    let outcome = deployer(&api)
        .deploy(&request("demo"), SharedBuffer::default())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        DeployOutcome::Deployed {
            status: StackStatus::UpdateComplete,
            ..
        }
    ));
    assert_eq!(api.calls(Operation::CreateChangeSet), 2);
    assert_eq!(api.calls(Operation::ExecuteChangeSet), 1);
}

#[tokio::test]
async fn test_unexecutable_change_set_names_ids() {
    let api = memory_api();
    api.script_review(ReviewScript::unavailable(
        "Template error: instance of Fn::GetAtt references undefined resource Bucket",
    ));

    let err = deployer(&api)
        .deploy(&request("demo"), SharedBuffer::default())
        .await
        .unwrap_err();

    let DeployError::ChangeSet(ChangeSetError::NotExecutable {
        id,
        stack_id,
        reason,
    }) = &err
    else {
        panic!("unexpected error: {err}");
    };

    assert!(id.starts_with("stackctl-"));
    assert_eq!(stack_id, "demo");
    assert!(reason.contains("undefined resource Bucket"));

    let message = err.to_string();
    assert!(message.contains(id.as_str()));
    assert!(message.contains("demo"));
    assert_eq!(api.calls(Operation::ExecuteChangeSet), 0);
}

#[tokio::test]
async fn test_review_waits_while_change_set_computes() {
    let api = memory_api();
    api.script_review(queue_added());
    api.set_computing_polls(2);
    api.script_statuses("demo", vec![StackStatus::CreateComplete]);

    deployer(&api)
        .deploy(&request("demo"), SharedBuffer::default())
        .await
        .unwrap();

    assert_eq!(api.calls(Operation::DescribeChangeSet), 3);
}

#[tokio::test]
async fn test_stream_failure_does_not_decide_outcome() {
    let api = memory_api();
    api.script_review(queue_added());
    api.script_statuses(
        "demo",
        vec![StackStatus::CreateInProgress, StackStatus::CreateComplete],
    );
    api.fail(Operation::DescribeStackEvents, "rate exceeded");

    let outcome = deployer(&api)
        .deploy(&request("demo"), SharedBuffer::default())
        .await
        .unwrap();

    let DeployOutcome::Deployed {
        status,
        stream_error,
        ..
    } = outcome
    else {
        panic!("expected a deployment");
    };
    assert_eq!(status, StackStatus::CreateComplete);
    assert!(stream_error.unwrap().contains("rate exceeded"));
}

#[tokio::test]
async fn test_execute_failure_is_reported() {
    let api = memory_api();
    api.script_review(queue_added());
    api.fail(Operation::ExecuteChangeSet, "insufficient capabilities");

    let err = deployer(&api)
        .deploy(&request("demo"), SharedBuffer::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::ChangeSet(ChangeSetError::ExecuteFailed { .. })
    ));
    assert!(err.to_string().contains("insufficient capabilities"));
    assert_eq!(api.calls(Operation::DescribeStack), 0);
}
