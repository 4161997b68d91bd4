//! End-to-end scenarios driven through the orchestrator.

mod common;

use std::time::Duration;

use common::fixtures::{build, entries_for, outcomes, triggered};
use common::{TestControl, APPROVAL_TIMEOUT};
use gantry_command::Environment;
use gantry_control::clients::ReleaseCall;
use gantry_control::orchestrator::DispatchOutcome;
use gantry_control::store::CorrelationStore;
use gantry_control::{
    ApprovalAction, ApprovalState, AuditOutcome, BuildStatus, ControlError, Decision,
    DeploymentStatus, ExternalBuildId, Reply,
};

#[tokio::test]
async fn build_then_success_callback() {
    let control = TestControl::new();

    let reply = control.say("alice", "@gantry build myapp main").await.unwrap();
    let Reply::BuildSubmitted { build } = reply else {
        panic!("expected a submitted build, got {reply:?}");
    };
    assert_eq!(build.external_id.as_str(), "42");
    assert_eq!(build.status, BuildStatus::Submitted);
    assert_eq!(build.requested_by, "alice");

    let transition = control
        .orchestrator
        .handle_build_callback(
            "myapp",
            ExternalBuildId::new("42"),
            BuildStatus::Succeeded,
            Some("https://ci.example.com/job/build-pipeline/42/".to_owned()),
        )
        .await
        .unwrap();
    assert!(transition.is_applied());

    let Reply::Status(report) = control.say("alice", "status myapp").await.unwrap() else {
        panic!("expected a status report");
    };
    let latest = report.latest_build.unwrap();
    assert_eq!(latest.status, BuildStatus::Succeeded);
    assert!(latest.completed_at.is_some());

    assert_eq!(
        outcomes(&control.audit_entries()),
        [
            ("build".to_owned(), AuditOutcome::Accepted),
            ("build.callback".to_owned(), AuditOutcome::Succeeded),
            ("status".to_owned(), AuditOutcome::Succeeded),
        ]
    );
    control.stop().await;
}

#[tokio::test]
async fn duplicate_build_callback_changes_status_once() {
    let control = TestControl::new();
    control.say("alice", "build myapp main").await.unwrap();

    let first = control
        .orchestrator
        .handle_build_callback("myapp", ExternalBuildId::new("42"), BuildStatus::Failed, None)
        .await
        .unwrap();
    let second = control
        .orchestrator
        .handle_build_callback("myapp", ExternalBuildId::new("42"), BuildStatus::Succeeded, None)
        .await
        .unwrap();

    assert!(first.is_applied());
    assert!(!second.is_applied());
    assert_eq!(second.into_inner().status, BuildStatus::Failed);

    let callbacks = outcomes(&control.audit_entries());
    assert_eq!(
        &callbacks[1..],
        [
            ("build.callback".to_owned(), AuditOutcome::Failed),
            ("build.callback".to_owned(), AuditOutcome::Ignored),
        ]
    );
    control.stop().await;
}

#[tokio::test]
async fn progress_report_does_not_close_build() {
    let control = TestControl::new();
    control.say("alice", "build myapp main").await.unwrap();

    let progress = control
        .orchestrator
        .handle_build_callback(
            "myapp",
            ExternalBuildId::new("42"),
            BuildStatus::from_result("BUILDING"),
            None,
        )
        .await
        .unwrap();
    assert!(!progress.is_applied());
    assert_eq!(progress.into_inner().status, BuildStatus::Submitted);

    let done = control
        .orchestrator
        .handle_build_callback(
            "myapp",
            ExternalBuildId::new("42"),
            BuildStatus::from_result("SUCCESS"),
            None,
        )
        .await
        .unwrap();
    assert!(done.is_applied());
    assert_eq!(done.into_inner().status, BuildStatus::Succeeded);

    let callbacks = outcomes(&control.audit_entries());
    assert_eq!(
        &callbacks[1..],
        [
            ("build.callback".to_owned(), AuditOutcome::Ignored),
            ("build.callback".to_owned(), AuditOutcome::Succeeded),
        ]
    );
    control.stop().await;
}

#[tokio::test]
async fn callbacks_are_scoped_to_their_app() {
    let control = TestControl::new();
    control.say("alice", "build myapp main").await.unwrap();

    let err = control
        .orchestrator
        .handle_build_callback("otherapp", ExternalBuildId::new("42"), BuildStatus::Succeeded, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NotFound(_)));

    let entries = control.audit_entries();
    assert_eq!(entries.last().unwrap().app, "otherapp");
    assert_eq!(entries.last().unwrap().outcome, AuditOutcome::Failed);
    control.stop().await;
}

#[tokio::test]
async fn qa_deploys_never_wait_for_approval() {
    let control = TestControl::new();

    let deployment = triggered(control.say("alice", "deploy myapp 42 qa").await.unwrap());
    assert_eq!(deployment.environment, Environment::Qa);
    assert_eq!(deployment.status, DeploymentStatus::Triggered);
    assert!(deployment.approval_id.is_none());

    assert!(control.gate.pending().is_empty());
    assert_eq!(control.releases.calls().unwrap().len(), 1);
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn uat_request_expires_without_deploying() {
    let control = TestControl::new();

    let Reply::ApprovalPending { approval } = control
        .say("alice", "deploy myapp 42 uat")
        .await
        .unwrap()
    else {
        panic!("uat deploys need approval");
    };
    assert_eq!(approval.state, ApprovalState::Pending);

    tokio::time::sleep(APPROVAL_TIMEOUT + Duration::from_secs(1)).await;

    assert!(control.gate.pending().is_empty());
    assert_eq!(
        control.gate.get(&approval.id).unwrap().state,
        ApprovalState::Expired
    );
    assert!(control
        .store
        .deployments_for("myapp", Environment::Uat)
        .await
        .unwrap()
        .is_empty());
    assert!(control.releases.calls().unwrap().is_empty());

    let entries = control.audit_entries();
    assert_eq!(entries_for(&entries, "approval.expire").len(), 1);
    let abandoned = entries_for(&entries, "deploy");
    assert_eq!(abandoned.last().unwrap().outcome, AuditOutcome::Abandoned);

    let err = control
        .orchestrator
        .handle_approval_decision("myapp", Environment::Uat, Decision::Approve, "lead1", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::AlreadyResolved {
            state: ApprovalState::Expired,
            ..
        }
    ));
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn approval_just_before_deadline_dispatches() {
    let control = TestControl::new();
    control.say("alice", "deploy myapp 42 uat").await.unwrap();

    tokio::time::sleep(APPROVAL_TIMEOUT - Duration::from_millis(1)).await;

    let outcome = control
        .orchestrator
        .handle_approval_decision("myapp", Environment::Uat, Decision::Approve, "lead1", None)
        .await
        .unwrap();
    assert_eq!(outcome.approval.state, ApprovalState::Approved);
    assert!(matches!(outcome.dispatch, DispatchOutcome::Dispatched { .. }));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(entries_for(&control.audit_entries(), "approval.expire").is_empty());
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn production_approval_then_second_decision() {
    let control = TestControl::new();

    let Reply::ApprovalPending { approval } = control
        .say("alice", "deploy myapp 42 prod")
        .await
        .unwrap()
    else {
        panic!("production deploys need approval");
    };
    assert!(control.releases.calls().unwrap().is_empty());

    let outcome = control
        .orchestrator
        .handle_approval_decision(
            "myapp",
            Environment::Production,
            Decision::Approve,
            "lead1",
            Some(&approval.id),
        )
        .await
        .unwrap();
    assert_eq!(outcome.approval.resolved_by.as_deref(), Some("lead1"));
    let DispatchOutcome::Dispatched { deployment } = outcome.dispatch else {
        panic!("approved deploy was not dispatched");
    };
    assert_eq!(deployment.approval_id.as_ref(), Some(&approval.id));
    assert_eq!(deployment.build, build(42));

    let err = control
        .orchestrator
        .handle_approval_decision(
            "myapp",
            Environment::Production,
            Decision::Reject,
            "lead2",
            Some(&approval.id),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::AlreadyResolved {
            state: ApprovalState::Approved,
            ..
        }
    ));
    assert_eq!(control.releases.calls().unwrap().len(), 1);
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_request_dispatches_nothing() {
    let control = TestControl::new();
    control.say("alice", "deploy myapp 42 prod").await.unwrap();

    let outcome = control
        .orchestrator
        .handle_approval_decision("myapp", Environment::Production, Decision::Reject, "lead1", None)
        .await
        .unwrap();
    assert_eq!(outcome.approval.state, ApprovalState::Rejected);
    assert_eq!(outcome.dispatch, DispatchOutcome::NotDispatched);
    assert!(control.releases.calls().unwrap().is_empty());

    // The slot is free again.
    let reply = control.say("alice", "deploy myapp 43 prod").await.unwrap();
    assert!(matches!(reply, Reply::ApprovalPending { .. }));
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn second_request_conflicts_while_pending() {
    let control = TestControl::new();
    control.say("alice", "deploy myapp 42 prod").await.unwrap();

    let err = control.say("bob", "deploy myapp 43 prod").await.unwrap_err();
    assert!(matches!(err, ControlError::Conflict { .. }));

    // Other environments and apps are independent slots.
    control.say("bob", "deploy myapp 43 uat").await.unwrap();
    control.say("bob", "deploy otherapp 7 prod").await.unwrap();
    assert_eq!(control.gate.pending().len(), 3);
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_dispatch_keeps_the_approval() {
    let control = TestControl::new();
    control.say("alice", "deploy myapp 42 prod").await.unwrap();
    control.releases.set_failing(true);

    let outcome = control
        .orchestrator
        .handle_approval_decision("myapp", Environment::Production, Decision::Approve, "lead1", None)
        .await
        .unwrap();
    assert_eq!(outcome.approval.state, ApprovalState::Approved);
    assert!(matches!(outcome.dispatch, DispatchOutcome::Failed { .. }));
    assert!(control
        .store
        .deployments_for("myapp", Environment::Production)
        .await
        .unwrap()
        .is_empty());

    let last = control.audit_entries().pop().unwrap();
    assert_eq!(last.action, "deploy");
    assert_eq!(last.outcome, AuditOutcome::Failed);
    control.stop().await;
}

#[tokio::test]
async fn rollback_to_previous_successful_build() {
    let control = TestControl::new();

    for n in [41, 42] {
        let deployment = triggered(
            control
                .say("alice", &format!("deploy myapp {n} qa"))
                .await
                .unwrap(),
        );
        control
            .orchestrator
            .handle_deployment_callback(&deployment.external_id, DeploymentStatus::Succeeded)
            .await
            .unwrap();
    }

    let rollback = triggered(control.say("alice", "rollback myapp qa").await.unwrap());
    assert_eq!(rollback.build, build(41));
    assert_eq!(rollback.status, DeploymentStatus::RolledBack);

    let calls = control.releases.calls().unwrap();
    assert!(matches!(
        calls.last().unwrap(),
        ReleaseCall::Rollback { target, .. } if *target == build(41)
    ));
    control.stop().await;
}

#[tokio::test]
async fn repeated_rollback_keeps_walking_back() {
    let control = TestControl::new();

    for n in [40, 41, 42] {
        let deployment = triggered(
            control
                .say("alice", &format!("deploy myapp {n} qa"))
                .await
                .unwrap(),
        );
        control
            .orchestrator
            .handle_deployment_callback(&deployment.external_id, DeploymentStatus::Succeeded)
            .await
            .unwrap();
    }

    let first = triggered(control.say("alice", "rollback myapp qa").await.unwrap());
    assert_eq!(first.build, build(41));
    let second = triggered(control.say("alice", "rollback myapp qa").await.unwrap());
    assert_eq!(second.build, build(40));

    let err = control.say("alice", "rollback myapp qa").await.unwrap_err();
    assert!(matches!(err, ControlError::NoRollbackTarget { .. }));
    control.stop().await;
}

#[tokio::test]
async fn rollback_never_returns_to_rolled_away_release() {
    let control = TestControl::new();

    for n in [41, 42] {
        let deployment = triggered(
            control
                .say("alice", &format!("deploy myapp {n} qa"))
                .await
                .unwrap(),
        );
        control
            .orchestrator
            .handle_deployment_callback(&deployment.external_id, DeploymentStatus::Succeeded)
            .await
            .unwrap();
    }

    let first = triggered(control.say("alice", "rollback myapp qa").await.unwrap());
    assert_eq!(first.build, build(41));

    let err = control.say("alice", "rollback myapp qa").await.unwrap_err();
    assert!(matches!(err, ControlError::NoRollbackTarget { .. }));
    let rollbacks = control
        .releases
        .calls()
        .unwrap()
        .into_iter()
        .filter(|c| matches!(c, ReleaseCall::Rollback { .. }))
        .count();
    assert_eq!(rollbacks, 1);
    control.stop().await;
}

#[tokio::test]
async fn rollback_skips_failed_deployments() {
    let control = TestControl::new();

    for (n, status) in [
        (40, DeploymentStatus::Succeeded),
        (41, DeploymentStatus::Failed),
        (42, DeploymentStatus::Succeeded),
    ] {
        let deployment = triggered(
            control
                .say("alice", &format!("deploy myapp {n} qa"))
                .await
                .unwrap(),
        );
        control
            .orchestrator
            .handle_deployment_callback(&deployment.external_id, status)
            .await
            .unwrap();
    }

    let rollback = triggered(control.say("alice", "rollback myapp qa").await.unwrap());
    assert_eq!(rollback.build, build(40));
    control.stop().await;
}

#[tokio::test]
async fn rollback_without_target_is_refused() {
    let control = TestControl::new();
    let deployment = triggered(control.say("alice", "deploy myapp 42 qa").await.unwrap());
    control
        .orchestrator
        .handle_deployment_callback(&deployment.external_id, DeploymentStatus::Succeeded)
        .await
        .unwrap();

    let err = control.say("alice", "rollback myapp qa").await.unwrap_err();
    assert!(matches!(err, ControlError::NoRollbackTarget { .. }));
    assert_eq!(
        control.audit_entries().last().unwrap().outcome,
        AuditOutcome::Failed
    );
    control.stop().await;
}

#[tokio::test(start_paused = true)]
async fn gated_rollback_waits_for_approval() {
    let control = TestControl::new();

    // Seed two successful production deployments through approvals.
    for n in [41, 42] {
        control
            .say("alice", &format!("deploy myapp {n} prod"))
            .await
            .unwrap();
        let outcome = control
            .orchestrator
            .handle_approval_decision("myapp", Environment::Production, Decision::Approve, "lead1", None)
            .await
            .unwrap();
        let DispatchOutcome::Dispatched { deployment } = outcome.dispatch else {
            panic!("approved deploy was not dispatched");
        };
        control
            .orchestrator
            .handle_deployment_callback(&deployment.external_id, DeploymentStatus::Succeeded)
            .await
            .unwrap();
    }

    let Reply::ApprovalPending { approval } =
        control.say("alice", "rollback myapp prod").await.unwrap()
    else {
        panic!("production rollbacks need approval");
    };
    assert_eq!(approval.action, ApprovalAction::Rollback);
    assert_eq!(approval.build, build(41));

    let outcome = control
        .orchestrator
        .handle_approval_decision("myapp", Environment::Production, Decision::Approve, "lead1", None)
        .await
        .unwrap();
    let DispatchOutcome::Dispatched { deployment } = outcome.dispatch else {
        panic!("approved rollback was not dispatched");
    };
    assert_eq!(deployment.status, DeploymentStatus::RolledBack);
    assert_eq!(deployment.build, build(41));
    assert_eq!(deployment.approval_id, Some(approval.id));
    assert!(matches!(
        control.releases.calls().unwrap().last().unwrap(),
        ReleaseCall::Rollback { target, .. } if *target == build(41)
    ));
    control.stop().await;
}

#[tokio::test]
async fn every_command_writes_one_audit_entry() {
    let control = TestControl::new();

    let lines = [
        "help",
        "launch myapp",
        "build myapp main",
        "deploy myapp 42 qa",
        "deploy myapp 42 uat",
        "deploy myapp 43 uat",
        "status myapp",
        "history myapp",
        "rollback myapp qa",
    ];
    for (i, line) in lines.into_iter().enumerate() {
        let _ = control.say("alice", line).await;
        assert_eq!(control.audit_entries().len(), i + 1, "after `{line}`");
    }

    control.builds.set_failing(true);
    control.say("alice", "build myapp main").await.unwrap_err();
    assert_eq!(control.audit_entries().len(), lines.len() + 1);
    control.stop().await;
}

#[tokio::test]
async fn audit_failure_fails_the_command() {
    let control = TestControl::new();
    control.audit.set_failing(true);

    let err = control.say("alice", "deploy myapp 42 qa").await.unwrap_err();
    assert!(err.is_fatal());
    control.stop().await;
}
