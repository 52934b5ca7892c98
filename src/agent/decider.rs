//! LLM-backed action decider.
//!
//! The model answers each turn with exactly one `<cmd type="...">` element.
//! Responses are parsed into the closed [`Action`] set here; anything that
//! does not parse is re-asked with a corrective message and never reaches
//! the worker loop.

use tracing::{debug, warn};

use super::client::{ChatMessage, SharedChatModel};
use super::prompts;
use super::{ActionDecider, AgentFuture, Decision, DecisionRequest, TokenUsage};
use crate::models::action::Action;
use crate::{AppError, Result};

/// Decider that asks a chat model for one command per turn.
pub struct LlmDecider {
    model: SharedChatModel,
    max_tokens: u32,
    max_parse_retries: u32,
    shared_dir: String,
}

impl LlmDecider {
    /// Decider using `model`.
    #[must_use]
    pub fn new(
        model: SharedChatModel,
        max_tokens: u32,
        max_parse_retries: u32,
        shared_dir: impl Into<String>,
    ) -> Self {
        Self {
            model,
            max_tokens,
            max_parse_retries,
            shared_dir: shared_dir.into(),
        }
    }
}

impl ActionDecider for LlmDecider {
    fn decide<'a>(&'a self, request: DecisionRequest<'a>) -> AgentFuture<'a, Decision> {
        Box::pin(async move {
            let mut messages = vec![
                ChatMessage::system(prompts::worker_system(
                    &request.subtask.description,
                    request.pane,
                    request.dependencies,
                    &self.shared_dir,
                )),
                ChatMessage::user(turn_message(&request)),
            ];
            let mut usage = TokenUsage::default();

            for attempt in 0..=self.max_parse_retries {
                let reply = self.model.chat(&messages, self.max_tokens).await?;
                usage.add(reply.usage);
                match parse_action(&reply.content) {
                    Ok(action) => {
                        debug!(
                            subtask_id = %request.subtask.id,
                            turn = request.turn,
                            action = %prompts::render_action(&action),
                            "decider chose action"
                        );
                        return Ok(Decision { action, usage });
                    }
                    Err(problem) => {
                        warn!(
                            subtask_id = %request.subtask.id,
                            turn = request.turn,
                            attempt,
                            %problem,
                            "unparseable decider response"
                        );
                        messages.push(ChatMessage::assistant(reply.content));
                        messages.push(ChatMessage::user(prompts::parse_retry(&problem)));
                    }
                }
            }
            Err(AppError::Decider(format!(
                "no well-formed command after {} attempts",
                self.max_parse_retries + 1
            )))
        })
    }
}

/// Observation handed to the model for one turn.
#[must_use]
pub fn turn_message(request: &DecisionRequest<'_>) -> String {
    let own = request.subtask.assigned_pane.as_str();
    let mut out = format!(
        "[Subtask {} Turn {}/{}]\n",
        request.subtask.id, request.turn, request.max_turns
    );
    if !request.history.is_empty() {
        out.push_str("Commands so far:\n");
        out.push_str(&prompts::history_section(request.history));
    }
    out.push_str(&format!("[Pane: {own}] [Meta: {}]\n", request.pane_title));
    if let Some(screen) = request.screens.get(own) {
        out.push_str(screen.trim_end());
        out.push('\n');
    }
    for (name, screen) in request.screens {
        if name != own {
            out.push_str(&format!(
                "\n[Other pane, read-only: {name}]\n{}\n",
                screen.trim_end()
            ));
        }
    }
    out
}

/// Parse the first `<cmd>` element of a model response.
///
/// # Errors
///
/// Returns a human-readable description of what is wrong with the response;
/// it is fed back to the model verbatim.
pub fn parse_action(text: &str) -> std::result::Result<Action, String> {
    let start = find_open_tag(text).ok_or("no <cmd> element found")?;
    let rest = &text[start + "<cmd".len()..];
    let tag_end = rest.find('>').ok_or("unterminated <cmd> tag")?;
    let attrs = &rest[..tag_end];
    let after = &rest[tag_end + 1..];
    let close = after.find("</cmd>").ok_or("missing </cmd>")?;
    let body = after[..close].trim();

    let kind = attribute(attrs, "type").ok_or("<cmd> element has no type attribute")?;
    match kind {
        "shell" if body.is_empty() => Err("empty shell command".into()),
        "shell" => Ok(Action::Inject(body.to_owned())),
        "task_complete" => Ok(Action::Complete(body.to_owned())),
        "task_failed" => Ok(Action::Fail(body.to_owned())),
        other => Err(format!("unsupported command type {other:?}")),
    }
}

fn find_open_tag(text: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(idx) = text[offset..].find("<cmd") {
        let at = offset + idx;
        let next = text[at + 4..].chars().next();
        if matches!(next, Some(c) if c.is_whitespace() || c == '>') {
            return Some(at);
        }
        offset = at + 4;
    }
    None
}

/// Value of the attribute `name`; only whole attribute names match.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(found) = attrs[from..].find(name) {
        let idx = from + found;
        from = idx + name.len();
        if !attrs[..idx].chars().next_back().is_none_or(char::is_whitespace) {
            continue;
        }
        let Some(value) = attrs[from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start();
        let quote = value.chars().next()?;
        if quote == '"' || quote == '\'' {
            let inner = &value[1..];
            let end = inner.find(quote)?;
            return Some(&inner[..end]);
        }
    }
    None
}
