//! Worker loop tests against in-memory panes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use paneflow::agent::ActionDecider;
use paneflow::models::action::Action;
use paneflow::models::plan::{Subtask, SubtaskStatus};
use paneflow::models::result::{FailureReason, SubtaskResult};
use paneflow::orchestrator::session_registry::Session;
use paneflow::orchestrator::worker::{PaneWorker, WorkerSettings};

use super::test_helpers::{shell_panes, test_config, FakeFactory, ScriptedDecider, PROMPT};

const NO_DEPS: [&str; 0] = [];

async fn session_with(factory: &Arc<FakeFactory>, names: &[&str]) -> Arc<Session> {
    let factory_dyn: Arc<dyn paneflow::driver::PaneFactory> = factory.clone();
    Arc::new(
        Session::create(&shell_panes(names), factory_dyn)
            .await
            .expect("session created"),
    )
}

fn worker(
    session: &Arc<Session>,
    decider: &Arc<ScriptedDecider>,
    max_turns: u32,
    cancel: CancellationToken,
) -> PaneWorker {
    let decider_dyn: Arc<dyn ActionDecider> = decider.clone();
    PaneWorker::new(
        Arc::clone(session),
        decider_dyn,
        WorkerSettings::from_config(&test_config(max_turns)),
        cancel,
    )
}

#[tokio::test(start_paused = true)]
async fn complete_directive_succeeds_with_summary() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::always_complete().script(
        "1",
        vec![
            Action::Inject("ls /tmp".into()),
            Action::Complete("listed /tmp".into()),
        ],
    ));

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "list", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.status, SubtaskStatus::Succeeded);
    assert_eq!(result.summary_text, "listed /tmp");
    assert_eq!(result.turns_used, 2);
    assert!(result.error.is_none());
    assert!(result.started_at.is_some() && result.finished_at.is_some());
    let injected = factory.pane("shell").injected();
    assert_eq!(injected.len(), 1);
    assert!(injected[0].starts_with("ls /tmp; printf"));
}

#[tokio::test(start_paused = true)]
async fn marker_never_leaks_into_the_next_turn_screen() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::always_complete().script(
        "1",
        vec![Action::Inject("echo hi".into()), Action::Complete("ok".into())],
    ));

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "echo", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.status, SubtaskStatus::Succeeded);
    let calls = decider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].history_len, 1);
    // The raw pane still carries the wrapper and the sentinel.
    assert!(factory.pane("shell").injected()[0].contains("printf"));
    let second = &calls[1].screens["shell"];
    assert_eq!(second, &format!("{PROMPT}echo hi\noutput\n{PROMPT}"));
    assert!(!second.contains("___DONE_"));
    assert!(!result.output_snippet.contains("___DONE_"));
    assert!(!result.output_snippet.contains("printf"));
    assert!(result.output_snippet.ends_with(&format!("output\n{PROMPT}")));
}

#[tokio::test(start_paused = true)]
async fn peer_screens_are_shown_without_sentinels() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell", "data"]).await;
    let decider = Arc::new(
        ScriptedDecider::always_complete()
            .script("1", vec![Action::Inject("ls".into()), Action::Complete("ok".into())]),
    );
    let worker = worker(&session, &decider, 5, CancellationToken::new());

    worker
        .run_subtask(&Subtask::new("1", "list", "shell", NO_DEPS), &[])
        .await;
    worker
        .run_subtask(&Subtask::new("2", "inspect", "data", NO_DEPS), &[])
        .await;

    let calls = decider.calls();
    let peer = &calls.last().expect("subtask 2 decided").screens["shell"];
    assert_eq!(peer, &format!("{PROMPT}ls\noutput\n{PROMPT}"));
}

#[tokio::test(start_paused = true)]
async fn fail_directive_records_declared_reason() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(
        ScriptedDecider::new(None).script("1", vec![Action::Fail("no such file".into())]),
    );

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "read", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.status, SubtaskStatus::Failed);
    assert_eq!(
        result.error,
        Some(FailureReason::Declared("no such file".into()))
    );
    assert_eq!(result.summary_text, "no such file");
    assert_eq!(result.turns_used, 1);
}

#[tokio::test(start_paused = true)]
async fn budget_exhausts_after_exactly_max_turns() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::new(Some(Action::Inject("echo again".into()))));

    let result = worker(&session, &decider, 3, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "loop", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.status, SubtaskStatus::Failed);
    assert_eq!(result.error, Some(FailureReason::BudgetExhausted { turns: 3 }));
    assert_eq!(result.turns_used, 3);
    assert_eq!(decider.calls_for("1"), 3);
    assert_eq!(factory.pane("shell").injected().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn subtask_turn_budget_overrides_the_default() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::new(Some(Action::Inject("true".into()))));

    let result = worker(&session, &decider, 10, CancellationToken::new())
        .run_subtask(
            &Subtask::new("1", "short", "shell", NO_DEPS).with_max_turns(2),
            &[],
        )
        .await;

    assert_eq!(result.error, Some(FailureReason::BudgetExhausted { turns: 2 }));
    assert_eq!(decider.calls_for("1"), 2);
}

#[tokio::test(start_paused = true)]
async fn unavailable_pane_fails_without_consulting_the_decider() {
    let factory = Arc::new(FakeFactory::new().failing("browser"));
    let session = session_with(&factory, &["shell", "browser"]).await;
    let decider = Arc::new(ScriptedDecider::always_complete());

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "browse", "browser", NO_DEPS), &[])
        .await;

    assert_eq!(result.status, SubtaskStatus::Failed);
    assert!(matches!(result.error, Some(FailureReason::PaneUnavailable(_))));
    assert_eq!(result.turns_used, 0);
    assert!(decider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exited_pane_fails_the_subtask() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    factory.pane("shell").set_alive(false);
    let decider = Arc::new(ScriptedDecider::always_complete());

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "anything", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.error, Some(FailureReason::PaneExited));
    assert!(decider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn capture_failure_is_a_pane_io_failure() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    factory.pane("shell").set_fail_capture(true);
    let decider = Arc::new(ScriptedDecider::always_complete());

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "anything", "shell", NO_DEPS), &[])
        .await;

    assert!(matches!(result.error, Some(FailureReason::PaneIo(_))));
}

#[tokio::test(start_paused = true)]
async fn decider_error_fails_the_subtask() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::new(None));

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("1", "anything", "shell", NO_DEPS), &[])
        .await;

    assert!(matches!(result.error, Some(FailureReason::Decider(_))));
    assert_eq!(result.turns_used, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_forced_settles_fail_as_unsettled() {
    let factory = Arc::new(FakeFactory::new().silent("shell"));
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::new(Some(Action::Inject("sleep 999".into()))));
    let mut config = test_config(10);
    config.detection.max_consecutive_forced_settles = 2;
    let decider_dyn: Arc<dyn ActionDecider> = decider.clone();
    let worker = PaneWorker::new(
        Arc::clone(&session),
        decider_dyn,
        WorkerSettings::from_config(&config),
        CancellationToken::new(),
    );

    let result = worker
        .run_subtask(&Subtask::new("1", "hang", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(
        result.error,
        Some(FailureReason::Unsettled { consecutive: 2 })
    );
    assert_eq!(decider.calls_for("1"), 2);
}

#[tokio::test(start_paused = true)]
async fn forced_settles_are_tolerated_when_the_limit_is_disabled() {
    let factory = Arc::new(FakeFactory::new().silent("shell"));
    let session = session_with(&factory, &["shell"]).await;
    let decider = Arc::new(ScriptedDecider::new(Some(Action::Inject("sleep 999".into()))));
    let mut config = test_config(3);
    config.detection.max_consecutive_forced_settles = 0;
    let decider_dyn: Arc<dyn ActionDecider> = decider.clone();
    let worker = PaneWorker::new(
        Arc::clone(&session),
        decider_dyn,
        WorkerSettings::from_config(&config),
        CancellationToken::new(),
    );

    let result = worker
        .run_subtask(&Subtask::new("1", "hang", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.error, Some(FailureReason::BudgetExhausted { turns: 3 }));
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_observed_at_the_next_turn() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell"]).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let decider = Arc::new(
        ScriptedDecider::new(Some(Action::Inject("echo working".into())))
            .on_call(move |_| trigger.cancel()),
    );

    let result = worker(&session, &decider, 5, cancel)
        .run_subtask(&Subtask::new("1", "work", "shell", NO_DEPS), &[])
        .await;

    assert_eq!(result.error, Some(FailureReason::Cancelled));
    assert_eq!(result.turns_used, 1);
    assert_eq!(decider.calls_for("1"), 1);
    // The in-progress injection still ran to completion.
    assert_eq!(factory.pane("shell").injected().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn decider_sees_dependencies_and_peer_screens() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell", "data"]).await;
    let decider = Arc::new(ScriptedDecider::always_complete().with_usage(120, 30));
    let upstream = SubtaskResult::succeeded("1", "fetched the report".into(), 2);

    let result = worker(&session, &decider, 5, CancellationToken::new())
        .run_subtask(&Subtask::new("2", "process", "data", ["1"]), &[upstream])
        .await;

    assert_eq!(result.status, SubtaskStatus::Succeeded);
    assert_eq!(result.prompt_tokens, 120);
    assert_eq!(result.completion_tokens, 30);
    let calls = decider.calls();
    assert_eq!(calls[0].dependencies, vec!["1".to_owned()]);
    let names: Vec<&str> = calls[0].screens.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["data", "shell"]);
    assert_eq!(calls[0].turn, 1);
}

#[tokio::test(start_paused = true)]
async fn peer_screens_are_hidden_when_sharing_is_off() {
    let factory = Arc::new(FakeFactory::new());
    let session = session_with(&factory, &["shell", "data"]).await;
    let decider = Arc::new(ScriptedDecider::always_complete());
    let mut config = test_config(5);
    config.scheduler.share_peer_screens = false;
    let decider_dyn: Arc<dyn ActionDecider> = decider.clone();
    let worker = PaneWorker::new(
        Arc::clone(&session),
        decider_dyn,
        WorkerSettings::from_config(&config),
        CancellationToken::new(),
    );

    worker
        .run_subtask(&Subtask::new("1", "solo", "shell", NO_DEPS), &[])
        .await;

    let names: Vec<String> = decider.calls()[0].screens.keys().cloned().collect();
    assert_eq!(names, vec!["shell".to_owned()]);
}
