//! Prompt templates for the planner, decider and summarizer.

use crate::models::action::{Action, TurnRecord};
use crate::models::pane::PaneInfo;
use crate::models::result::{tail_chars, SubtaskResult};

/// Characters of a dependency's output snippet shown to the decider.
const DEPENDENCY_SNIPPET_CHARS: usize = 300;

/// One line per pane: `  - name [app_type]: description`.
#[must_use]
pub fn tools_summary(panes: &[PaneInfo]) -> String {
    panes
        .iter()
        .map(|p| format!("  - {} [{}]: {}", p.name, p.app_type, p.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for the planner.
#[must_use]
pub fn planner_system(panes: &[PaneInfo], shared_dir: &str) -> String {
    format!(
        r#"You are a task planner for an autonomous terminal agent.

Given a task and a set of available tools, decompose the task into subtasks that can be executed by independent workers. Each worker controls exactly one terminal pane and decides one command at a time.

Available tools:
{tools}

RULES:
1. Each subtask must target exactly one pane.
2. Subtasks on DIFFERENT panes can run in parallel when there is no data dependency.
3. Subtasks on the SAME pane run one after another; add depends_on when the order matters.
4. Keep subtasks at goal-level granularity: "fetch the page and extract links", not "run curl".
5. A worker can execute several commands to reach its goal.
6. Prefer fewer, broader subtasks over many tiny ones.
7. Only add dependencies where there is a real data flow or ordering requirement.
8. Workers share data by writing files to {shared_dir}/.

Respond with a JSON object and nothing else:
{{
  "subtasks": [
    {{"id": "1", "description": "What this subtask should accomplish", "pane": "shell", "depends_on": []}},
    {{"id": "2", "description": "Work that can run in parallel on another pane", "pane": "browser", "depends_on": []}},
    {{"id": "3", "description": "Work that needs the results of 1 and 2", "pane": "shell", "depends_on": ["1", "2"]}}
  ]
}}
"#,
        tools = tools_summary(panes),
    )
}

/// System prompt for one subtask's decider conversation.
#[must_use]
pub fn worker_system(
    description: &str,
    pane: &PaneInfo,
    dependencies: &[SubtaskResult],
    shared_dir: &str,
) -> String {
    let context = dependency_context(dependencies);
    let dep_section = if context.is_empty() {
        String::new()
    } else {
        format!("\nResults from prerequisite tasks (use this information):\n{context}\n")
    };
    format!(
        r#"You are an autonomous agent worker controlling a single terminal pane.

Your pane: {name} [{app_type}] - {tool}

Your goal:
{description}
{dep_section}
Send exactly one command per turn using XML tags:

  <cmd type="shell">your command here</cmd>
  <cmd type="task_complete">summary of what you accomplished</cmd>
  <cmd type="task_failed">why the goal cannot be reached</cmd>

Rules:
- One command per turn.
- Use task_complete as soon as your goal is achieved.
- Use task_failed only when the goal is clearly unreachable.
- Write intermediate results to {shared_dir}/ so other tasks can use them.
- If something unexpected happens, look at the screen and recover.
- Silent commands (mkdir, touch) produce no output; this is normal.
- Do not print large files to the terminal; use head, grep or wc.
"#,
        name = pane.name,
        app_type = pane.app_type,
        tool = pane.description,
    )
}

/// Summaries and output tails of succeeded dependencies.
#[must_use]
pub fn dependency_context(dependencies: &[SubtaskResult]) -> String {
    let mut out = String::new();
    for dep in dependencies {
        out.push_str(&format!(
            "[Subtask {} result]: {}\n",
            dep.subtask_id, dep.summary_text
        ));
        if !dep.output_snippet.is_empty() {
            out.push_str(&format!(
                "[Subtask {} last output]:\n{}\n",
                dep.subtask_id,
                tail_chars(&dep.output_snippet, DEPENDENCY_SNIPPET_CHARS)
            ));
        }
    }
    out.trim_end().to_owned()
}

/// Render an action in the decider's XML protocol.
#[must_use]
pub fn render_action(action: &Action) -> String {
    match action {
        Action::Inject(keys) => format!(r#"<cmd type="shell">{keys}</cmd>"#),
        Action::Complete(summary) => format!(r#"<cmd type="task_complete">{summary}</cmd>"#),
        Action::Fail(summary) => format!(r#"<cmd type="task_failed">{summary}</cmd>"#),
    }
}

/// Compact listing of earlier turns.
#[must_use]
pub fn history_section(history: &[TurnRecord]) -> String {
    let mut out = String::new();
    for record in history {
        out.push_str(&format!("  {}. {}", record.turn, render_action(&record.action)));
        if record.settle.is_some_and(|settle| settle.forced) {
            out.push_str(" (still running or waiting for input when observed)");
        }
        out.push('\n');
    }
    out
}

/// Corrective message sent after an unparseable response.
#[must_use]
pub fn parse_retry(problem: &str) -> String {
    format!(
        "Your reply could not be used: {problem}. Reply with exactly one \
         <cmd type=\"shell\">, <cmd type=\"task_complete\"> or \
         <cmd type=\"task_failed\"> element."
    )
}

/// System prompt for the final report.
#[must_use]
pub fn summarizer_system() -> &'static str {
    "You are summarizing the results of a multi-step task execution.\n\n\
     Given the original task and the results from each subtask, provide:\n\
     1. A concise summary of what was accomplished\n\
     2. Any notable findings or outputs\n\
     3. Any subtasks that failed or were skipped, and why\n\n\
     Be concise and factual."
}
