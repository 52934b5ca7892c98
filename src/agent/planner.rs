//! LLM-backed planner.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use super::client::{ChatMessage, SharedChatModel};
use super::prompts;
use super::{AgentFuture, Planner, TokenUsage};
use crate::models::pane::PaneInfo;
use crate::models::plan::{Plan, Subtask};
use crate::{AppError, Result};

/// Attempts made when the model returns an empty response.
pub const PLANNER_ATTEMPTS: u32 = 3;

const PLANNER_MAX_TOKENS: u32 = 2048;

/// Planner that asks a chat model for a JSON subtask graph.
pub struct LlmPlanner {
    model: SharedChatModel,
    shared_dir: String,
}

impl LlmPlanner {
    /// Planner using `model`; `shared_dir` is advertised as the place where
    /// workers exchange files.
    #[must_use]
    pub fn new(model: SharedChatModel, shared_dir: impl Into<String>) -> Self {
        Self {
            model,
            shared_dir: shared_dir.into(),
        }
    }

    async fn request(&self, task: &str, panes: &[PaneInfo]) -> Result<String> {
        let messages = [
            ChatMessage::system(prompts::planner_system(panes, &self.shared_dir)),
            ChatMessage::user(format!("Task: {task}")),
        ];
        let mut usage = TokenUsage::default();
        for attempt in 1..=PLANNER_ATTEMPTS {
            let reply = self.model.chat(&messages, PLANNER_MAX_TOKENS).await?;
            usage.add(reply.usage);
            info!(
                attempt,
                prompt_tokens = reply.usage.prompt_tokens,
                completion_tokens = reply.usage.completion_tokens,
                "planner responded"
            );
            if !reply.content.trim().is_empty() {
                return Ok(reply.content);
            }
            warn!(attempt, "planner returned an empty response");
        }
        Err(AppError::Planner(format!(
            "empty response after {PLANNER_ATTEMPTS} attempts"
        )))
    }
}

impl Planner for LlmPlanner {
    fn plan<'a>(&'a self, task: &'a str, panes: &'a [PaneInfo]) -> AgentFuture<'a, Plan> {
        Box::pin(
            async move {
                let content = self.request(task, panes).await?;
                parse_plan(task, &content, panes)
            }
            .instrument(info_span!("plan")),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    subtasks: Vec<RawSubtask>,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    id: Value,
    description: String,
    pane: String,
    #[serde(default)]
    depends_on: Vec<Value>,
}

/// Parse a planner response into a validated plan.
///
/// # Errors
///
/// Returns `AppError::Planner` if no JSON graph can be read from `content`
/// and `AppError::Plan` if the graph is malformed.
pub fn parse_plan(task: &str, content: &str, panes: &[PaneInfo]) -> Result<Plan> {
    let json = extract_json(content)?;
    let raw: RawPlan = serde_json::from_str(json).map_err(|err| {
        let snippet: String = json.chars().take(500).collect();
        AppError::Planner(format!("invalid plan json: {err} (raw: {snippet})"))
    })?;

    let mut subtasks = Vec::with_capacity(raw.subtasks.len());
    for item in raw.subtasks {
        let id = id_text(&item.id)?;
        let deps = item
            .depends_on
            .iter()
            .map(id_text)
            .collect::<Result<Vec<_>>>()?;
        subtasks.push(Subtask::new(&id, &item.description, &item.pane, deps));
    }
    Plan::build(task, subtasks, panes.iter().map(|p| p.name.as_str()))
}

/// Locate the JSON object in a model response, preferring a fenced block.
///
/// # Errors
///
/// Returns `AppError::Planner` if the text holds no `{ ... }` object.
pub fn extract_json(content: &str) -> Result<&str> {
    if let Some(fenced) = fenced_block(content) {
        return Ok(fenced);
    }
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&content[start..=end]),
        _ => Err(AppError::Planner(
            "no json object found in planner response".into(),
        )),
    }
}

fn fenced_block(content: &str) -> Option<&str> {
    let open = content.find("```")?;
    let after = &content[open + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let close = after.find("```")?;
    let inner = after[..close].trim();
    (inner.starts_with('{') && inner.ends_with('}')).then_some(inner)
}

fn id_text(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.trim().to_owned()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(AppError::Planner(format!(
            "subtask id must be a string or number, got {other}"
        ))),
    }
}
