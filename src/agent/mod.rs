//! Collaborators at the edge of the core: planner, action decider and
//! summarizer.
//!
//! The core only sees the traits defined here. The LLM-backed
//! implementations live in the submodules; tests substitute scripted ones.

pub mod client;
pub mod decider;
pub mod planner;
pub mod prompts;
pub mod summarizer;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::models::action::{Action, TurnRecord};
use crate::models::pane::PaneInfo;
use crate::models::plan::{Plan, Subtask};
use crate::models::result::SubtaskResult;
use crate::Result;

/// Boxed future returned by collaborator methods.
pub type AgentFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Tokens spent by one or more model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Accumulate `other` into `self`.
    pub fn add(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Everything the decider sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    /// Subtask being driven.
    pub subtask: &'a Subtask,
    /// Descriptor of the pane the subtask is bound to.
    pub pane: &'a PaneInfo,
    /// Current title of the bound pane.
    pub pane_title: &'a str,
    /// Screens keyed by pane name; always contains the bound pane and, when
    /// peer sharing is on, read-only snapshots of the others.
    pub screens: &'a BTreeMap<String, String>,
    /// Turns already taken, oldest first.
    pub history: &'a [TurnRecord],
    /// Results of the subtask's dependencies, all succeeded.
    pub dependencies: &'a [SubtaskResult],
    /// 1-based number of the turn being decided.
    pub turn: u32,
    /// Turn budget for the subtask.
    pub max_turns: u32,
}

/// Action chosen for a turn plus what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Parsed action.
    pub action: Action,
    /// Tokens spent deciding.
    pub usage: TokenUsage,
}

impl Decision {
    /// Decision that cost nothing.
    #[must_use]
    pub fn free(action: Action) -> Self {
        Self {
            action,
            usage: TokenUsage::default(),
        }
    }
}

/// Turns a task description into a validated plan.
pub trait Planner: Send + Sync {
    /// Decompose `task` into subtasks bound to `panes`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Plan` if the produced graph is malformed and
    /// `AppError::Planner` (or `AppError::Llm`) if no graph was produced.
    fn plan<'a>(&'a self, task: &'a str, panes: &'a [PaneInfo]) -> AgentFuture<'a, Plan>;
}

/// Chooses the next action from the current screens.
pub trait ActionDecider: Send + Sync {
    /// Decide the action for one turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Decider` if no well-formed action could be
    /// obtained, or `AppError::Llm` on transport failure.
    fn decide<'a>(&'a self, request: DecisionRequest<'a>) -> AgentFuture<'a, Decision>;
}

/// Turns the collected results into a report.
pub trait Summarizer: Send + Sync {
    /// Summarize a finished run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Summarizer` or `AppError::Llm` on failure.
    fn summarize<'a>(&'a self, task: &'a str, results: &'a [SubtaskResult])
        -> AgentFuture<'a, String>;
}
