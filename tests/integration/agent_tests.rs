//! Planner, decider and summarizer behaviour against a scripted chat model.

use std::collections::BTreeMap;
use std::sync::Arc;

use paneflow::agent::client::{Role, SharedChatModel};
use paneflow::agent::decider::LlmDecider;
use paneflow::agent::planner::{LlmPlanner, PLANNER_ATTEMPTS};
use paneflow::agent::summarizer::LlmSummarizer;
use paneflow::agent::{ActionDecider, DecisionRequest, Planner, Summarizer};
use paneflow::models::action::Action;
use paneflow::models::pane::PaneInfo;
use paneflow::models::plan::Subtask;
use paneflow::models::result::SubtaskResult;
use paneflow::AppError;

use super::test_helpers::{shell_panes, ScriptedChat};

const PLAN_JSON: &str = r#"Here is the plan:
```json
{"subtasks": [
  {"id": 1, "description": "fetch the page", "pane": "browser", "depends_on": []},
  {"id": 2, "description": "extract links", "pane": "shell", "depends_on": [1]}
]}
```"#;

fn shared(chat: &Arc<ScriptedChat>) -> SharedChatModel {
    chat.clone()
}

#[tokio::test]
async fn planner_builds_a_validated_plan() {
    let chat = Arc::new(ScriptedChat::new([PLAN_JSON]));
    let planner = LlmPlanner::new(shared(&chat), "/tmp/paneflow");
    let panes = shell_panes(&["shell", "browser"]);

    let plan = planner.plan("collect links", &panes).await.expect("plan");

    assert_eq!(plan.task(), "collect links");
    assert_eq!(plan.ids().collect::<Vec<_>>(), vec!["1", "2"]);
    let second = plan.get("2").expect("subtask 2");
    assert_eq!(second.assigned_pane, "shell");
    assert!(second.dependency_ids.contains("1"));

    let request = &chat.requests()[0];
    assert_eq!(request[0].role, Role::System);
    assert!(request[0].content.contains("browser"));
    assert_eq!(request[1].content, "Task: collect links");
}

#[tokio::test]
async fn planner_retries_empty_responses() {
    let chat = Arc::new(ScriptedChat::new(["", "   ", PLAN_JSON]));
    let planner = LlmPlanner::new(shared(&chat), "/tmp/paneflow");

    let plan = planner
        .plan("collect links", &shell_panes(&["shell", "browser"]))
        .await
        .expect("third attempt succeeds");

    assert_eq!(plan.len(), 2);
    assert_eq!(chat.requests().len(), 3);
}

#[tokio::test]
async fn planner_gives_up_after_repeated_empty_responses() {
    let chat = Arc::new(ScriptedChat::new(["", "", "", PLAN_JSON]));
    let planner = LlmPlanner::new(shared(&chat), "/tmp/paneflow");

    let err = planner
        .plan("collect links", &shell_panes(&["shell", "browser"]))
        .await
        .expect_err("empty responses");

    assert!(matches!(err, AppError::Planner(_)));
    assert_eq!(chat.requests().len(), PLANNER_ATTEMPTS as usize);
}

#[tokio::test]
async fn planner_rejects_unknown_panes_as_invalid_plan() {
    let chat = Arc::new(ScriptedChat::new([PLAN_JSON]));
    let planner = LlmPlanner::new(shared(&chat), "/tmp/paneflow");

    let err = planner
        .plan("collect links", &shell_panes(&["shell"]))
        .await
        .expect_err("browser is not in the profile");

    assert!(matches!(err, AppError::Plan(ref msg) if msg.contains("unknown pane 'browser'")));
}

#[tokio::test]
async fn planner_transport_errors_propagate() {
    let chat = Arc::new(ScriptedChat::failing());
    let planner = LlmPlanner::new(shared(&chat), "/tmp/paneflow");

    let err = planner
        .plan("anything", &shell_panes(&["shell"]))
        .await
        .expect_err("transport failure");

    assert!(matches!(err, AppError::Llm(_)));
}

struct Turn {
    subtask: Subtask,
    pane: PaneInfo,
    screens: BTreeMap<String, String>,
}

impl Turn {
    fn new() -> Self {
        let pane = PaneInfo::shell("shell", "shell", "bash");
        let mut screens = BTreeMap::new();
        screens.insert("shell".to_owned(), "[AGENT_READY] $ ".to_owned());
        screens.insert("data".to_owned(), "csv ready".to_owned());
        Self {
            subtask: Subtask::new("3", "count lines", "shell", ["1"]),
            pane,
            screens,
        }
    }

    fn request<'a>(&'a self, dependencies: &'a [SubtaskResult]) -> DecisionRequest<'a> {
        DecisionRequest {
            subtask: &self.subtask,
            pane: &self.pane,
            pane_title: "bash",
            screens: &self.screens,
            history: &[],
            dependencies,
            turn: 1,
            max_turns: 15,
        }
    }
}

#[tokio::test]
async fn decider_returns_the_parsed_action() {
    let chat = Arc::new(ScriptedChat::new([r#"<cmd type="shell">wc -l notes.txt</cmd>"#]));
    let decider = LlmDecider::new(shared(&chat), 512, 2, "/tmp/paneflow");
    let turn = Turn::new();
    let deps = [SubtaskResult::succeeded("1", "wrote notes.txt".into(), 1)];

    let decision = decider.decide(turn.request(&deps)).await.expect("decision");

    assert_eq!(decision.action, Action::Inject("wc -l notes.txt".into()));
    assert_eq!(decision.usage.prompt_tokens, 10);
    let request = &chat.requests()[0];
    assert!(request[0].content.contains("wrote notes.txt"));
    assert!(request[1].content.contains("[Subtask 3 Turn 1/15]"));
    assert!(request[1].content.contains("[Other pane, read-only: data]"));
}

#[tokio::test]
async fn decider_reasks_after_a_malformed_response() {
    let chat = Arc::new(ScriptedChat::new([
        "I think we should list the files.",
        r#"<cmd type="task_complete">counted 42 lines</cmd>"#,
    ]));
    let decider = LlmDecider::new(shared(&chat), 512, 2, "/tmp/paneflow");
    let turn = Turn::new();

    let decision = decider.decide(turn.request(&[])).await.expect("decision");

    assert_eq!(decision.action, Action::Complete("counted 42 lines".into()));
    assert_eq!(decision.usage.prompt_tokens, 20);
    assert_eq!(decision.usage.completion_tokens, 10);
    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    let retry = &requests[1];
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2].role, Role::Assistant);
    assert_eq!(retry[3].role, Role::User);
    assert!(retry[3].content.contains("no <cmd> element found"));
}

#[tokio::test]
async fn decider_fails_once_retries_are_exhausted() {
    let chat = Arc::new(ScriptedChat::new([
        "nope",
        r#"<cmd type="reboot">now</cmd>"#,
        r#"<cmd type="shell">ls</cmd>"#,
    ]));
    let decider = LlmDecider::new(shared(&chat), 512, 1, "/tmp/paneflow");
    let turn = Turn::new();

    let err = decider
        .decide(turn.request(&[]))
        .await
        .expect_err("two malformed answers");

    assert!(matches!(err, AppError::Decider(_)));
    assert_eq!(chat.requests().len(), 2);
}

#[tokio::test]
async fn summarizer_trims_model_output() {
    let chat = Arc::new(ScriptedChat::new(["\n  All files listed.  \n"]));
    let summarizer = LlmSummarizer::new(shared(&chat), 256);
    let results = [SubtaskResult::succeeded("1", "listed".into(), 1)];

    let summary = summarizer
        .summarize("list files", &results)
        .await
        .expect("summary");

    assert_eq!(summary, "All files listed.");
    assert!(chat.requests()[0][1].content.contains("list files"));
}

#[tokio::test]
async fn summarizer_rejects_an_empty_summary() {
    let chat = Arc::new(ScriptedChat::new([" "]));
    let summarizer = LlmSummarizer::new(shared(&chat), 256);

    let err = summarizer
        .summarize("list files", &[])
        .await
        .expect_err("empty summary");

    assert!(matches!(err, AppError::Summarizer(_)));
}
