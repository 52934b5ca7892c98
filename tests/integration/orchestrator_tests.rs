//! End-to-end runs through the orchestrator with in-memory panes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use paneflow::agent::summarizer::{LlmSummarizer, PlainSummarizer};
use paneflow::agent::{ActionDecider, Planner, Summarizer};
use paneflow::driver::PaneFactory;
use paneflow::exit_codes;
use paneflow::models::action::Action;
use paneflow::models::plan::{Subtask, SubtaskStatus};
use paneflow::orchestrator::runner::{exit_code_for, Orchestrator};
use paneflow::AppError;

use super::test_helpers::{
    by_id, shell_panes, test_config, FakeFactory, ScriptedChat, ScriptedDecider, ScriptedPlanner,
};

const NO_DEPS: [&str; 0] = [];

struct Harness {
    factory: Arc<FakeFactory>,
    decider: Arc<ScriptedDecider>,
}

impl Harness {
    fn new(factory: FakeFactory, decider: ScriptedDecider) -> Self {
        Self {
            factory: Arc::new(factory),
            decider: Arc::new(decider),
        }
    }

    fn orchestrator(&self, subtasks: Vec<Subtask>, summarizer: Arc<dyn Summarizer>) -> Orchestrator {
        let planner: Arc<dyn Planner> = Arc::new(ScriptedPlanner::new(subtasks));
        let decider: Arc<dyn ActionDecider> = self.decider.clone();
        let factory: Arc<dyn PaneFactory> = self.factory.clone();
        Orchestrator::new(
            test_config(5),
            shell_panes(&["shell", "browser", "data"]),
            planner,
            decider,
            summarizer,
            factory,
        )
    }
}

fn plain() -> Arc<dyn Summarizer> {
    Arc::new(PlainSummarizer)
}

#[tokio::test(start_paused = true)]
async fn parallel_roots_then_join_all_succeed() {
    let harness = Harness::new(FakeFactory::new(), ScriptedDecider::always_complete());
    let orchestrator = harness.orchestrator(
        vec![
            Subtask::new("A", "fetch", "browser", NO_DEPS),
            Subtask::new("B", "crunch", "data", NO_DEPS),
            Subtask::new("C", "report", "shell", ["A", "B"]),
        ],
        plain(),
    );

    let report = orchestrator.run("build a report").await.expect("report");

    assert_eq!(report.results.len(), 3);
    assert!(report
        .results
        .iter()
        .all(|r| r.status == SubtaskStatus::Succeeded));
    assert_eq!(report.exit_code(), exit_codes::OK);
    let calls = harness.decider.calls();
    assert_eq!(calls.last().map(|c| c.subtask_id.as_str()), Some("C"));
    assert_eq!(calls.last().map(|c| c.dependencies.clone()), Some(vec!["A".to_owned(), "B".to_owned()]));
    assert_eq!(harness.factory.shutdown_count(), 1);
    assert_eq!(report.panes["C"], "shell");
    assert!(report.render().contains("[C] succeeded"));
}

#[tokio::test(start_paused = true)]
async fn failed_parent_skips_child_without_consulting_decider() {
    let decider = ScriptedDecider::always_complete()
        .script("A", vec![Action::Fail("site is down".into())]);
    let harness = Harness::new(FakeFactory::new(), decider);
    let orchestrator = harness.orchestrator(
        vec![
            Subtask::new("A", "fetch", "browser", NO_DEPS),
            Subtask::new("B", "process", "data", ["A"]),
        ],
        plain(),
    );

    let report = orchestrator.run("fetch and process").await.expect("report");
    let results = by_id(&report.results);

    assert_eq!(results["A"].status, SubtaskStatus::Failed);
    assert_eq!(results["B"].status, SubtaskStatus::Skipped);
    assert_eq!(results["B"].blocked_by.as_deref(), Some("A"));
    assert_eq!(harness.decider.calls_for("B"), 0);
    assert_eq!(report.exit_code(), exit_codes::NO_SUCCESS);
    assert!(report.render().contains("blocked by: A"));
}

#[tokio::test(start_paused = true)]
async fn invalid_plan_has_no_side_effects() {
    let harness = Harness::new(FakeFactory::new(), ScriptedDecider::always_complete());
    let orchestrator = harness.orchestrator(
        vec![
            Subtask::new("1", "one", "shell", ["2"]),
            Subtask::new("2", "two", "shell", ["1"]),
        ],
        plain(),
    );

    let err = orchestrator.run("loop forever").await.expect_err("cycle");

    assert!(matches!(err, AppError::Plan(ref msg) if msg.contains("cycle")));
    assert_eq!(exit_code_for(&err), exit_codes::PLAN_INVALID);
    assert_eq!(harness.factory.attempt_count(), 0);
    assert!(harness.decider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_plan_succeeds_without_a_session() {
    let harness = Harness::new(FakeFactory::new(), ScriptedDecider::always_complete());
    let orchestrator = harness.orchestrator(Vec::new(), plain());

    let report = orchestrator.run("nothing to do").await.expect("report");

    assert!(report.results.is_empty());
    assert_eq!(report.exit_code(), exit_codes::OK);
    assert_eq!(harness.factory.attempt_count(), 0);
    assert!(report.render().contains("(no subtasks)"));
}

#[tokio::test(start_paused = true)]
async fn summarizer_failure_falls_back_to_plain_summary() {
    let harness = Harness::new(FakeFactory::new(), ScriptedDecider::always_complete());
    let chat = Arc::new(ScriptedChat::failing());
    let summarizer: Arc<dyn Summarizer> = Arc::new(LlmSummarizer::new(chat, 256));
    let orchestrator = harness.orchestrator(
        vec![Subtask::new("1", "list", "shell", NO_DEPS)],
        summarizer,
    );

    let report = orchestrator.run("list files").await.expect("report");

    assert!(report.summary.starts_with("Task: list files"));
    assert!(report.summary.contains("Completed 1 of 1 subtasks"));
}

#[tokio::test(start_paused = true)]
async fn unavailable_pane_fails_only_its_subtasks() {
    let harness = Harness::new(
        FakeFactory::new().failing("browser"),
        ScriptedDecider::always_complete(),
    );
    let orchestrator = harness.orchestrator(
        vec![
            Subtask::new("1", "browse", "browser", NO_DEPS),
            Subtask::new("2", "shell work", "shell", NO_DEPS),
        ],
        plain(),
    );

    let report = orchestrator.run("mixed").await.expect("report");
    let results = by_id(&report.results);

    assert_eq!(results["1"].status, SubtaskStatus::Failed);
    assert_eq!(results["2"].status, SubtaskStatus::Succeeded);
    assert_eq!(report.exit_code(), exit_codes::OK);
    assert_eq!(harness.decider.calls_for("1"), 0);
}

#[tokio::test(start_paused = true)]
async fn every_pane_failing_is_a_runtime_error() {
    let harness = Harness::new(
        FakeFactory::new()
            .failing("shell")
            .failing("browser")
            .failing("data"),
        ScriptedDecider::always_complete(),
    );
    let orchestrator = harness.orchestrator(vec![Subtask::new("1", "x", "shell", NO_DEPS)], plain());

    let err = orchestrator.run("doomed").await.expect_err("no panes");

    assert!(matches!(err, AppError::Pane(_)));
    assert_eq!(exit_code_for(&err), exit_codes::RUNTIME);
    assert_eq!(harness.factory.shutdown_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_during_run_skips_pending_work_and_tears_down() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let decider = ScriptedDecider::new(Some(Action::Inject("make".into())))
        .on_call(move |_| trigger.cancel());
    let harness = Harness::new(FakeFactory::new(), decider);
    let orchestrator = harness
        .orchestrator(
            vec![
                Subtask::new("1", "build", "shell", NO_DEPS),
                Subtask::new("2", "test", "shell", ["1"]),
            ],
            plain(),
        )
        .with_cancellation(cancel);

    let report = orchestrator.run("build and test").await.expect("report");
    let results = by_id(&report.results);

    assert_eq!(
        results["1"].error,
        Some(paneflow::models::result::FailureReason::Cancelled)
    );
    assert_eq!(results["2"].status, SubtaskStatus::Skipped);
    assert_eq!(harness.factory.shutdown_count(), 1);
    assert_eq!(harness.factory.pane("shell").terminate_count(), 1);
}
