//! Report summarizers.

use super::client::{ChatMessage, SharedChatModel};
use super::prompts;
use super::{AgentFuture, Summarizer};
use crate::models::plan::SubtaskStatus;
use crate::models::result::{tail_chars, SubtaskResult};
use crate::{AppError, Result};

const SUMMARY_SNIPPET_CHARS: usize = 200;

/// Summarizer backed by a chat model.
pub struct LlmSummarizer {
    model: SharedChatModel,
    max_tokens: u32,
}

impl LlmSummarizer {
    /// Summarizer using `model`.
    #[must_use]
    pub fn new(model: SharedChatModel, max_tokens: u32) -> Self {
        Self { model, max_tokens }
    }
}

impl Summarizer for LlmSummarizer {
    fn summarize<'a>(
        &'a self,
        task: &'a str,
        results: &'a [SubtaskResult],
    ) -> AgentFuture<'a, String> {
        Box::pin(async move {
            let messages = [
                ChatMessage::system(prompts::summarizer_system()),
                ChatMessage::user(results_digest(task, results)),
            ];
            let reply = self.model.chat(&messages, self.max_tokens).await?;
            let text = reply.content.trim();
            if text.is_empty() {
                return Err(AppError::Summarizer("model returned an empty summary".into()));
            }
            Ok(text.to_owned())
        })
    }
}

/// Deterministic summarizer that needs no model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSummarizer;

impl PlainSummarizer {
    /// Render the summary synchronously.
    #[must_use]
    pub fn render(task: &str, results: &[SubtaskResult]) -> String {
        let count = |status: SubtaskStatus| results.iter().filter(|r| r.status == status).count();
        let mut out = format!(
            "Task: {task}\nCompleted {} of {} subtasks ({} failed, {} skipped).",
            count(SubtaskStatus::Succeeded),
            results.len(),
            count(SubtaskStatus::Failed),
            count(SubtaskStatus::Skipped),
        );
        for result in results
            .iter()
            .filter(|r| r.status == SubtaskStatus::Succeeded)
        {
            out.push_str(&format!("\n- [{}] {}", result.subtask_id, result.summary_text));
        }
        out
    }
}

impl Summarizer for PlainSummarizer {
    fn summarize<'a>(
        &'a self,
        task: &'a str,
        results: &'a [SubtaskResult],
    ) -> AgentFuture<'a, String> {
        Box::pin(async move { Ok(Self::render(task, results)) })
    }
}

/// Task and per-subtask outcomes as one user message.
#[must_use]
pub fn results_digest(task: &str, results: &[SubtaskResult]) -> String {
    let mut out = format!("Task: {task}\n\nResults:\n");
    for result in results {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            result.subtask_id,
            result.status.as_str().to_uppercase(),
            result.summary_text
        ));
        if !result.output_snippet.is_empty() {
            out.push_str(&format!(
                "  output: {}\n",
                tail_chars(&result.output_snippet, SUMMARY_SNIPPET_CHARS)
            ));
        }
    }
    out
}
