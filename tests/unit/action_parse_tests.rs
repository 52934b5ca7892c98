//! Decider response parsing and planner JSON extraction.

use paneflow::agent::decider::parse_action;
use paneflow::agent::planner::{extract_json, parse_plan};
use paneflow::models::action::Action;
use paneflow::models::pane::PaneInfo;
use paneflow::AppError;

#[test]
fn shell_command_becomes_inject() {
    let action = parse_action(r#"Let me look. <cmd type="shell">ls -la /tmp</cmd>"#).expect("parsed");
    assert_eq!(action, Action::Inject("ls -la /tmp".into()));
}

#[test]
fn single_quoted_attribute_is_accepted() {
    let action = parse_action("<cmd type='task_complete'>all done</cmd>").expect("parsed");
    assert_eq!(action, Action::Complete("all done".into()));
}

#[test]
fn task_failed_becomes_fail() {
    let action = parse_action("<cmd type=\"task_failed\">\n  host unreachable\n</cmd>").expect("parsed");
    assert_eq!(action, Action::Fail("host unreachable".into()));
}

#[test]
fn first_element_wins() {
    let action = parse_action(
        r#"<cmd type="shell">pwd</cmd> then <cmd type="task_complete">x</cmd>"#,
    )
    .expect("parsed");
    assert_eq!(action, Action::Inject("pwd".into()));
}

#[test]
fn similarly_named_tags_are_ignored() {
    let action = parse_action(r#"<cmdline>noise</cmdline><cmd type="shell">date</cmd>"#).expect("parsed");
    assert_eq!(action, Action::Inject("date".into()));
}

#[test]
fn commands_keep_shell_metacharacters() {
    let action = parse_action(r#"<cmd type="shell">grep -c "a > b" f.txt | head -n 1</cmd>"#).expect("parsed");
    assert_eq!(action, Action::Inject(r#"grep -c "a > b" f.txt | head -n 1"#.into()));
}

#[test]
fn malformed_responses_explain_the_problem() {
    assert_eq!(
        parse_action("just prose").unwrap_err(),
        "no <cmd> element found"
    );
    assert_eq!(
        parse_action(r#"<cmd type="shell">   </cmd>"#).unwrap_err(),
        "empty shell command"
    );
    assert_eq!(parse_action(r#"<cmd type="shell">ls"#).unwrap_err(), "missing </cmd>");
    assert_eq!(
        parse_action("<cmd>ls</cmd>").unwrap_err(),
        "<cmd> element has no type attribute"
    );
    assert!(parse_action(r#"<cmd type="python">print(1)</cmd>"#)
        .unwrap_err()
        .contains("unsupported command type"));
}

#[test]
fn completion_summary_may_be_empty() {
    let action = parse_action(r#"<cmd type="task_complete"></cmd>"#).expect("parsed");
    assert_eq!(action, Action::Complete(String::new()));
    assert!(action.is_terminal());
    assert!(!Action::Inject("ls".into()).is_terminal());
}

#[test]
fn json_is_found_in_fenced_block() {
    let text = "Plan below\n```json\n{\"subtasks\": []}\n```\nDone.";
    assert_eq!(extract_json(text).expect("json"), "{\"subtasks\": []}");
}

#[test]
fn json_is_found_in_bare_prose() {
    let text = "Sure! {\"subtasks\": [{\"id\": \"1\"}]} hope that helps";
    assert_eq!(
        extract_json(text).expect("json"),
        "{\"subtasks\": [{\"id\": \"1\"}]}"
    );
}

#[test]
fn missing_json_is_a_planner_error() {
    assert!(matches!(extract_json("no braces"), Err(AppError::Planner(_))));
    assert!(matches!(extract_json("} backwards {"), Err(AppError::Planner(_))));
}

#[test]
fn plan_ids_may_be_numbers_or_strings() {
    let panes = vec![PaneInfo::shell("shell", "shell", "bash")];
    let content = r#"{"subtasks": [
        {"id": 1, "description": "a", "pane": "shell"},
        {"id": " 2 ", "description": "b", "pane": "shell", "depends_on": [1]}
    ]}"#;

    let plan = parse_plan("task", content, &panes).expect("plan");

    assert_eq!(plan.ids().collect::<Vec<_>>(), vec!["1", "2"]);
    assert!(plan.get("2").expect("2").dependency_ids.contains("1"));
}

#[test]
fn invalid_plan_json_is_a_planner_error() {
    let panes = vec![PaneInfo::shell("shell", "shell", "bash")];
    let err = parse_plan("task", r#"{"subtasks": "nope"}"#, &panes).expect_err("bad json");
    assert!(matches!(err, AppError::Planner(ref msg) if msg.contains("invalid plan json")));

    let err = parse_plan(
        "task",
        r#"{"subtasks": [{"id": true, "description": "a", "pane": "shell"}]}"#,
        &panes,
    )
    .expect_err("bad id");
    assert!(matches!(err, AppError::Planner(_)));
}

#[test]
fn structurally_invalid_plan_is_a_plan_error() {
    let panes = vec![PaneInfo::shell("shell", "shell", "bash")];
    let content = r#"{"subtasks": [{"id": "1", "description": "a", "pane": "shell", "depends_on": ["2"]}]}"#;

    let err = parse_plan("task", content, &panes).expect_err("dangling");

    assert!(matches!(err, AppError::Plan(_)));
}

#[test]
fn type_attribute_must_be_a_whole_name() {
    let action = parse_action(r#"<cmd subtype="shell" type="task_failed">disk full</cmd>"#)
        .expect("parsed");
    assert_eq!(action, Action::Fail("disk full".into()));

    assert_eq!(
        parse_action(r#"<cmd subtype="shell">ls</cmd>"#).unwrap_err(),
        "<cmd> element has no type attribute"
    );
}
