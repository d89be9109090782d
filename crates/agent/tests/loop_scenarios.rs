//! End-to-end loop scenarios.
//!
//! Each test drives a real `LoopEngine` against a scripted backend and a
//! scripted executor, with the policy engine, approval queue and control
//! handle wired in the way the kernel wires them.

use helmsman_agent::testing::{mock_resolver, FixedApprover, RecordingHooks, ScriptedExecutor};
use helmsman_agent::{ApprovalQueue, ApprovalRequester, LoopEngine};
use helmsman_core::{
    ActionOutcome, BackendReply, Disposition, LoopStatus, ModelSelection, RequestedAction,
    SessionConfig, ToolRegistry,
};
use helmsman_policy::{Operator, Policy, PolicyEnforcer, PolicyEngine, PolicyKind, PolicySet};
use helmsman_providers::testing::ScriptedProvider;
use helmsman_providers::{KeyManager, ModelResolver};
use helmsman_telemetry::CostTracker;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ─────────────────────────────────────────────────────────────

fn session(max_iterations: u32) -> SessionConfig {
    let mut config = SessionConfig::new("ops-agent", ModelSelection::new("mock", "mock-model"));
    config.max_iterations = max_iterations;
    config
}

fn call(name: &str) -> BackendReply {
    BackendReply::with_actions("", vec![RequestedAction::new(name, json!({}))])
}

fn gate(policies: Vec<Policy>) -> Arc<PolicyEnforcer> {
    let mut set = PolicySet::new();
    for policy in policies {
        set.add(policy);
    }
    Arc::new(PolicyEnforcer::new(Arc::new(PolicyEngine::new(set).unwrap())))
}

fn deny_all() -> Policy {
    Policy::new("deny-everything", PolicyKind::Deny)
}

fn approval_for(action: &str) -> Policy {
    Policy::new("review-deploys", PolicyKind::RequireApproval).with_condition(
        "action",
        Operator::Eq,
        json!(action),
    )
}

// ── Termination ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_action_every_turn_hits_the_iteration_limit() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(call("x")));
    let result = LoopEngine::new(session(3), mock_resolver(provider.clone()), Arc::new(ToolRegistry::new()))
        .run("Do the thing")
        .await;

    assert_eq!(result.status, LoopStatus::MaxIterations);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.actions.len(), 3);
    assert!(result.actions.iter().all(|a| a.name == "x" && !a.output.success));
    assert!(result
        .actions
        .iter()
        .all(|a| a.output.error.as_deref() == Some("not found")));
    assert_eq!(result.response, "Max iterations reached without completing the task.");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn plain_text_reply_completes_in_one_iteration() {
    let provider = Arc::new(ScriptedProvider::new("mock"));
    provider.push_ok(BackendReply::text("Done"));
    let hooks = Arc::new(RecordingHooks::default());

    let result = LoopEngine::new(session(10), mock_resolver(provider), Arc::new(ToolRegistry::new()))
        .with_hooks(hooks.clone())
        .run("Say done")
        .await;

    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.response, "Done");
    assert_eq!(result.iterations, 1);
    assert!(result.actions.is_empty());
    assert!(result.error.is_none());
    assert_eq!(hooks.iterations(), [1]);
    assert_eq!(hooks.completed(), vec![LoopStatus::Completed]);
}

// ── Policy gate ─────────────────────────────────────────────────────────

#[tokio::test]
async fn deny_all_policy_never_executes_anything() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Gave up")));
    provider.push_ok(call("delete_file"));
    provider.push_ok(call("send_email"));
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_action("delete_file", ActionOutcome::success(json!("deleted")))
            .with_action("send_email", ActionOutcome::success(json!("sent"))),
    );

    let result = LoopEngine::new(session(10), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![deny_all()]))
        .run("Clean up and report")
        .await;

    assert_eq!(result.status, LoopStatus::Completed);
    assert!(executor.calls().is_empty());
    assert_eq!(result.actions.len(), 2);
    for record in &result.actions {
        assert_eq!(record.disposition, Disposition::Denied);
        assert_eq!(
            record.output.error.as_deref(),
            Some("Denied by policy: deny-everything")
        );
    }
}

#[tokio::test]
async fn denial_wins_over_approval_and_skips_the_reviewer() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("ok")));
    provider.push_ok(call("deploy"));
    let executor = Arc::new(ScriptedExecutor::new().with_action("deploy", ActionOutcome::success(json!(1))));
    let approver = Arc::new(FixedApprover::approving());

    let result = LoopEngine::new(session(5), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![
            deny_all().with_priority(10),
            approval_for("deploy").with_priority(5),
        ]))
        .with_approvals(approver.clone() as Arc<dyn ApprovalRequester>)
        .run("Ship it")
        .await;

    assert_eq!(result.actions[0].disposition, Disposition::Denied);
    assert!(approver.requests().is_empty());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn policies_see_the_action_input() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("ok")));
    provider.push_ok(BackendReply::with_actions(
        "",
        vec![
            RequestedAction::new("read_file", json!({"path": "/etc/shadow"})),
            RequestedAction::new("read_file", json!({"path": "/srv/report.txt"})),
        ],
    ));
    let executor = Arc::new(
        ScriptedExecutor::new().with_action("read_file", ActionOutcome::success(json!("contents"))),
    );
    let secrets = Policy::new("no-secrets", PolicyKind::Deny).with_condition(
        "path",
        Operator::Matches,
        json!("^/etc/"),
    );

    let result = LoopEngine::new(session(5), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![secrets]))
        .run("Read the files")
        .await;

    let dispositions: Vec<Disposition> = result.actions.iter().map(|a| a.disposition).collect();
    assert_eq!(dispositions, [Disposition::Denied, Disposition::Allowed]);
    assert_eq!(executor.calls(), ["read_file"]);
}

// ── Approvals ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_approval_is_reported_to_the_model() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Understood")));
    provider.push_ok(call("deploy"));
    let executor = Arc::new(ScriptedExecutor::new().with_action("deploy", ActionOutcome::success(json!(1))));
    let approver = Arc::new(FixedApprover::rejecting("not during the freeze"));

    let result = LoopEngine::new(session(5), mock_resolver(provider.clone()), executor.clone())
        .with_policy_gate(gate(vec![approval_for("deploy")]))
        .with_approvals(approver.clone() as Arc<dyn ApprovalRequester>)
        .run("Deploy the release")
        .await;

    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.actions[0].disposition, Disposition::Rejected);
    assert_eq!(
        result.actions[0].output.error.as_deref(),
        Some("Action rejected by human reviewer")
    );
    assert!(executor.calls().is_empty());

    let requests = approver.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, "deploy");
    assert_eq!(requests[0].reason, "Requires approval: review-deploys");

    let last = provider.last_request().unwrap();
    assert!(last
        .turns
        .iter()
        .any(|t| t.content.contains("Action rejected by human reviewer")));
}

#[tokio::test]
async fn queued_approval_lets_the_action_run() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Deployed")));
    provider.push_ok(call("deploy"));
    let executor = Arc::new(ScriptedExecutor::new().with_action("deploy", ActionOutcome::success(json!("v2"))));
    let queue = Arc::new(ApprovalQueue::default());
    let mut announcements = queue.subscribe();

    let engine = LoopEngine::new(session(5), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![approval_for("deploy")]))
        .with_approvals(queue.clone() as Arc<dyn ApprovalRequester>);
    let control = engine.control();
    let session = tokio::spawn(engine.run("Deploy v2"));

    let request = announcements.recv().await.unwrap();
    assert_eq!(request.action, "deploy");
    assert_eq!(control.status(), LoopStatus::WaitingApproval);
    assert_eq!(queue.pending_count(), 1);
    assert!(queue.approve(&request.id));

    let result = session.await.unwrap();
    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.actions[0].disposition, Disposition::Allowed);
    assert_eq!(executor.calls(), ["deploy"]);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test]
async fn queued_rejection_blocks_the_action() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Fine")));
    provider.push_ok(call("deploy"));
    let executor = Arc::new(ScriptedExecutor::new().with_action("deploy", ActionOutcome::success(json!("v2"))));
    let queue = Arc::new(ApprovalQueue::default());
    let mut announcements = queue.subscribe();

    let engine = LoopEngine::new(session(5), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![approval_for("deploy")]))
        .with_approvals(queue.clone() as Arc<dyn ApprovalRequester>);
    let session = tokio::spawn(engine.run("Deploy v2"));

    let request = announcements.recv().await.unwrap();
    assert!(queue.reject(&request.id, "wrong window"));
    // A second decision finds nothing to decide.
    assert!(!queue.approve(&request.id));

    let result = session.await.unwrap();
    assert_eq!(result.actions[0].disposition, Disposition::Rejected);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn abort_while_waiting_for_approval_terminates_and_cleans_up() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(call("deploy")));
    let executor = Arc::new(ScriptedExecutor::new().with_action("deploy", ActionOutcome::success(json!(1))));
    let queue = Arc::new(ApprovalQueue::default());
    let mut announcements = queue.subscribe();

    let engine = LoopEngine::new(session(5), mock_resolver(provider), executor.clone())
        .with_policy_gate(gate(vec![approval_for("deploy")]))
        .with_approvals(queue.clone() as Arc<dyn ApprovalRequester>);
    let control = engine.control();
    let session = tokio::spawn(engine.run("Deploy"));

    announcements.recv().await.unwrap();
    assert_eq!(queue.pending_count(), 1);
    control.abort();

    let result = session.await.unwrap();
    assert_eq!(result.status, LoopStatus::Terminated);
    assert!(result.actions.is_empty());
    assert!(executor.calls().is_empty());
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(control.status(), LoopStatus::Terminated);
}

// ── Pause, resume, abort ────────────────────────────────────────────────

#[tokio::test]
async fn paused_session_waits_until_resumed() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Done")));
    let engine = LoopEngine::new(session(5), mock_resolver(provider.clone()), Arc::new(ToolRegistry::new()));
    let control = engine.control();
    let mut status = control.watch_status();

    control.pause();
    let session = tokio::spawn(engine.run("Wait for me"));

    status.wait_for(|s| *s == LoopStatus::Paused).await.unwrap();
    assert_eq!(provider.calls(), 0);

    control.resume();
    let result = session.await.unwrap();
    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn abort_while_paused_terminates() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(BackendReply::text("Done")));
    let engine = LoopEngine::new(session(5), mock_resolver(provider.clone()), Arc::new(ToolRegistry::new()));
    let control = engine.control();
    let mut status = control.watch_status();

    control.pause();
    let session = tokio::spawn(engine.run("Never mind"));
    status.wait_for(|s| *s == LoopStatus::Paused).await.unwrap();

    control.abort();
    let result = session.await.unwrap();
    assert_eq!(result.status, LoopStatus::Terminated);
    assert_eq!(result.iterations, 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn abort_mid_session_stops_at_the_next_checkpoint() {
    let provider = Arc::new(ScriptedProvider::new("mock").with_repeat(call("poll")));
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_action("poll", ActionOutcome::success(json!("pending")))
            .with_delay(Duration::from_secs(1)),
    );
    let engine = LoopEngine::new(session(100), mock_resolver(provider), executor.clone());
    let control = engine.control();
    let session = tokio::spawn(engine.run("Poll until ready"));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    control.abort();

    let result = session.await.unwrap();
    assert_eq!(result.status, LoopStatus::Terminated);
    // The action in flight at abort time still finishes and is recorded.
    assert_eq!(result.actions.len(), 3);
    assert_eq!(executor.calls().len(), 3);
}

// ── Shared state ────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_sessions_share_one_resolver() {
    let provider = Arc::new(
        ScriptedProvider::new("mock")
            .with_repeat(BackendReply::text("Done"))
            .with_flat_cost(0.25),
    );
    let resolver = mock_resolver(provider.clone());

    let first = LoopEngine::new(session(5), resolver.clone(), Arc::new(ToolRegistry::new()));
    let second = LoopEngine::new(session(5), resolver.clone(), Arc::new(ToolRegistry::new()));
    assert_ne!(first.session_id(), second.session_id());

    let (a, b) = tokio::join!(first.run("one"), second.run("two"));
    assert_eq!(a.status, LoopStatus::Completed);
    assert_eq!(b.status, LoopStatus::Completed);
    assert!((a.cost_usd - 0.25).abs() < 1e-9);
    assert!((b.cost_usd - 0.25).abs() < 1e-9);

    assert_eq!(provider.calls(), 2);
    assert_eq!(resolver.cost_tracker().entry_count(), 2);
    assert!((resolver.cost_tracker().total_cost() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn exhausted_budget_turns_into_model_failures() {
    let provider = Arc::new(
        ScriptedProvider::new("mock")
            .with_repeat(BackendReply::text("never seen"))
            .with_flat_cost(1.0),
    );
    provider.push_ok(BackendReply::with_actions(
        "Checking the queue",
        vec![RequestedAction::new("x", json!({}))],
    ));
    let resolver = ModelResolver::new(
        Arc::new(KeyManager::default()),
        Arc::new(CostTracker::with_budget(1.0)),
    );
    resolver.register(provider.clone(), &[]);

    let result = LoopEngine::new(session(3), Arc::new(resolver), Arc::new(ToolRegistry::new()))
        .run("Drain the queue")
        .await;

    assert_eq!(result.status, LoopStatus::MaxIterations);
    assert_eq!(result.iterations, 3);
    assert_eq!(provider.calls(), 1);
    assert!((result.cost_usd - 1.0).abs() < 1e-9);
    assert_eq!(result.response, "Checking the queue");
}
