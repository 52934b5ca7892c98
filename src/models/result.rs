//! Subtask outcome model.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::SubtaskStatus;

/// Number of trailing screen characters retained on a result.
pub const OUTPUT_SNIPPET_CHARS: usize = 500;

/// Why a subtask ended in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// The decider declared the subtask failed.
    Declared(String),
    /// The turn budget ran out without a completion directive.
    BudgetExhausted {
        /// Turns consumed.
        turns: u32,
    },
    /// The assigned pane could not be created or leased.
    PaneUnavailable(String),
    /// The pane's process exited mid-run.
    PaneExited,
    /// Capturing from or injecting into the pane failed.
    PaneIo(String),
    /// The decider could not produce a well-formed action.
    Decider(String),
    /// The pane never settled for too many consecutive turns.
    Unsettled {
        /// Consecutive forced settles observed.
        consecutive: u32,
    },
    /// The operator aborted the run.
    Cancelled,
    /// The worker task panicked.
    WorkerPanicked(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declared(summary) => write!(f, "declared failed: {summary}"),
            Self::BudgetExhausted { turns } => {
                write!(f, "turn budget exhausted after {turns} turns")
            }
            Self::PaneUnavailable(msg) => write!(f, "pane unavailable: {msg}"),
            Self::PaneExited => write!(f, "pane process exited"),
            Self::PaneIo(msg) => write!(f, "pane i/o: {msg}"),
            Self::Decider(msg) => write!(f, "decider: {msg}"),
            Self::Unsettled { consecutive } => {
                write!(f, "pane did not settle for {consecutive} consecutive turns")
            }
            Self::Cancelled => write!(f, "cancelled by operator"),
            Self::WorkerPanicked(msg) => write!(f, "worker panicked: {msg}"),
        }
    }
}

/// Outcome of one subtask execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SubtaskResult {
    /// Subtask this result belongs to.
    pub subtask_id: String,
    /// Terminal status: succeeded, failed, or skipped.
    pub status: SubtaskStatus,
    /// Final summary or synthesized explanation.
    pub summary_text: String,
    /// Tail of the last captured screen.
    #[serde(default)]
    pub output_snippet: String,
    /// Turns consumed by the worker.
    pub turns_used: u32,
    /// Failure reason; present iff `status` is failed.
    #[serde(default)]
    pub error: Option<FailureReason>,
    /// Failed ancestor that caused a skip.
    #[serde(default)]
    pub blocked_by: Option<String>,
    /// Prompt tokens spent by the decider.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens spent by the decider.
    #[serde(default)]
    pub completion_tokens: u64,
    /// When the worker started; absent for skipped subtasks.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the worker returned; absent for skipped subtasks.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubtaskResult {
    /// Successful outcome carrying the decider's summary.
    #[must_use]
    pub fn succeeded(subtask_id: &str, summary: String, turns_used: u32) -> Self {
        Self::base(subtask_id, SubtaskStatus::Succeeded, summary, turns_used, None)
    }

    /// Failed outcome; the summary defaults to the reason's text.
    #[must_use]
    pub fn failed(subtask_id: &str, reason: FailureReason, turns_used: u32) -> Self {
        let summary = match &reason {
            FailureReason::Declared(summary) => summary.clone(),
            other => other.to_string(),
        };
        Self::base(
            subtask_id,
            SubtaskStatus::Failed,
            summary,
            turns_used,
            Some(reason),
        )
    }

    /// Skipped because `ancestor` failed.
    #[must_use]
    pub fn skipped(subtask_id: &str, ancestor: &str) -> Self {
        let mut result = Self::base(
            subtask_id,
            SubtaskStatus::Skipped,
            format!("skipped: dependency {ancestor} did not succeed"),
            0,
            None,
        );
        result.blocked_by = Some(ancestor.to_owned());
        result
    }

    /// Skipped because the run was cancelled before launch.
    #[must_use]
    pub fn cancelled_before_start(subtask_id: &str) -> Self {
        Self::base(
            subtask_id,
            SubtaskStatus::Skipped,
            "skipped: run cancelled before start".to_owned(),
            0,
            None,
        )
    }

    /// Attach the tail of the final screen.
    #[must_use]
    pub fn with_snippet(mut self, screen: &str) -> Self {
        self.output_snippet = tail_chars(screen, OUTPUT_SNIPPET_CHARS).to_owned();
        self
    }

    fn base(
        subtask_id: &str,
        status: SubtaskStatus,
        summary_text: String,
        turns_used: u32,
        error: Option<FailureReason>,
    ) -> Self {
        Self {
            subtask_id: subtask_id.to_owned(),
            status,
            summary_text,
            output_snippet: String::new(),
            turns_used,
            error,
            blocked_by: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Last `max` characters of `text`, respecting char boundaries.
#[must_use]
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    text.char_indices()
        .nth(skip)
        .map_or("", |(idx, _)| &text[idx..])
}
