//! Per-turn action produced by the decider and the turn history it feeds.

use serde::{Deserialize, Serialize};

use super::pane::DetectionStrategy;

/// Closed set of directives a worker can receive each turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Action {
    /// Type the keystrokes into the pane and submit them with Enter.
    Inject(String),
    /// The subtask is done; carries the final summary.
    Complete(String),
    /// The subtask cannot be done; carries the explanation.
    Fail(String),
}

impl Action {
    /// Whether the action ends the worker loop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Fail(_))
    }
}

/// How an injection's settle was observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SettleRecord {
    /// Strategy that ran.
    pub strategy: DetectionStrategy,
    /// Whether the wait ceiling forced the settle.
    pub forced: bool,
}

/// One completed turn of a worker loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TurnRecord {
    /// 1-based turn number.
    pub turn: u32,
    /// Action decided for the turn.
    pub action: Action,
    /// Settle observation following an injection.
    pub settle: Option<SettleRecord>,
}
