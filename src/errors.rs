//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every fatal failure mode.
///
/// Subtask-level failures never use this type; they are converted into
/// [`FailureReason`](crate::models::result::FailureReason) data on the
/// subtask's result instead.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed plan: cycle, dangling dependency, unknown pane, duplicate id.
    Plan(String),
    /// Pane creation, capture, or injection failure.
    Pane(String),
    /// Action decider failure (malformed response after retries).
    Decider(String),
    /// Planner failure (empty or unparsable plan).
    Planner(String),
    /// Summarizer failure.
    Summarizer(String),
    /// Transport failure while talking to a language model endpoint.
    Llm(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Plan(msg) => write!(f, "plan: {msg}"),
            Self::Pane(msg) => write!(f, "pane: {msg}"),
            Self::Decider(msg) => write!(f, "decider: {msg}"),
            Self::Planner(msg) => write!(f, "planner: {msg}"),
            Self::Summarizer(msg) => write!(f, "summarizer: {msg}"),
            Self::Llm(msg) => write!(f, "llm: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Llm(err.to_string())
    }
}
