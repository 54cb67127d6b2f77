//! End-to-end implement pipeline against recording fakes.

mod support;

use gaffer_core::feedback::RequestId;
use gaffer_runner::implement::run_implement;
use support::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn successful_run_drives_collaborators_in_order() {
    let fx = fixture();
    fx.agent.push_outcome(agent_success(Some("sess-1"), ""));

    run_implement(fx.ctx.clone(), work_item(42), CancellationToken::new())
        .await
        .unwrap();

    fx.log.assert_order(&[
        "remove_label:42:gaffer",
        "add_label:42:gaffer-wip",
        "comment:42",
        "workspace_create:auto/issue-42:CreateOrResume",
        "agent_invoke",
        "publish:auto/issue-42",
        "create_request:auto/issue-42",
        "comment:42",
        "remove_label:42:gaffer-wip",
        "discard:auto/issue-42",
    ]);

    assert_eq!(fx.log.count_exact("remove_label:42:gaffer"), 1);
    assert_eq!(fx.log.count_exact("add_label:42:gaffer-wip"), 1);
    assert_eq!(fx.log.count_prefix("workspace_create:"), 1);
    assert_eq!(fx.log.count_exact("agent_invoke"), 1);
    assert_eq!(fx.log.count_prefix("publish:"), 1);
    assert_eq!(fx.log.count_prefix("create_request:"), 1);
    assert_eq!(fx.log.count_exact("remove_label:42:gaffer-wip"), 1);
    assert_eq!(fx.log.count_prefix("discard:"), 1);

    // no failure label, and exactly one comment linking the new request
    assert_eq!(fx.log.count_exact("add_label:42:gaffer-failed"), 0);
    let links: Vec<String> = fx
        .tracker
        .comments_on(42)
        .into_iter()
        .filter(|body| body.contains("/pull/"))
        .collect();
    assert_eq!(links.len(), 1);
    assert!(links[0].contains("Opened change request"));
}

#[tokio::test]
async fn change_request_targets_trunk_and_embeds_agent_output() {
    let fx = fixture();
    let stdout = "{\"session_id\":\"sess-9\"}\n\
                  [DECISION_POINT] retry strategy | exponential backoff | fixed delay\n";
    fx.agent.push_outcome(agent_success(Some("sess-9"), stdout));

    run_implement(fx.ctx.clone(), work_item(42), CancellationToken::new())
        .await
        .unwrap();

    let created = fx.tracker.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].head_branch, "auto/issue-42");
    assert_eq!(created[0].base_branch.as_deref(), Some("main"));
    assert_eq!(created[0].title, "Fix bug 42 (#42)");
    assert!(created[0].body.contains("retry strategy"));
    assert!(created[0].body.contains("exponential backoff"));
    assert!(created[0].body.contains("sess-9"));
    drop(created);

    // the session is stored under the request the run just created
    assert_eq!(
        fx.ctx.sessions.get(RequestId(100)),
        Some("sess-9".to_string())
    );
}

#[tokio::test]
async fn agent_failure_compensates_and_keeps_the_request_unopened() {
    let fx = fixture();
    fx.agent.push_outcome(agent_failure(1, "tool crashed"));

    let err = run_implement(fx.ctx.clone(), work_item(42), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("exited with status 1"));

    assert_eq!(fx.log.count_prefix("publish:"), 0);
    assert_eq!(fx.log.count_prefix("create_request:"), 0);
    assert_eq!(fx.log.count_exact("add_label:42:gaffer-failed"), 1);
    assert_eq!(fx.log.count_exact("remove_label:42:gaffer-wip"), 1);
    assert_eq!(fx.log.count_prefix("discard:"), 1);

    let comments = fx.tracker.comments_on(42);
    let failure_comment = comments
        .iter()
        .find(|body| body.contains("failed"))
        .expect("failure comment");
    assert!(failure_comment.contains("exited with status 1"));
    assert!(failure_comment.contains("tool crashed"));
}

#[tokio::test]
async fn claim_failure_aborts_before_any_workspace_exists() {
    let fx = fixture();
    fx.tracker.fail_next("add_label");

    let err = run_implement(fx.ctx.clone(), work_item(42), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("in-progress label"));

    assert_eq!(fx.log.count_prefix("workspace_create:"), 0);
    assert_eq!(fx.log.count_exact("agent_invoke"), 0);
    assert_eq!(fx.log.count_prefix("discard:"), 0);
    // compensation still marks the failure
    assert_eq!(fx.log.count_exact("add_label:42:gaffer-failed"), 1);
    assert!(!fx.tracker.comments_on(42).is_empty());
}

#[tokio::test]
async fn cancelled_agent_run_is_reported_as_a_failure() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_implement(fx.ctx.clone(), work_item(42), cancel)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("cancelled"));

    assert_eq!(fx.log.count_prefix("publish:"), 0);
    assert_eq!(fx.log.count_prefix("create_request:"), 0);
    assert_eq!(fx.log.count_prefix("discard:"), 1);
    assert!(
        fx.tracker
            .comments_on(42)
            .iter()
            .any(|body| body.contains("cancelled"))
    );
}
