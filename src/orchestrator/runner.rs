//! Top-level run: plan, create the session, schedule, summarize, tear down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::summarizer::PlainSummarizer;
use crate::agent::{ActionDecider, Planner, Summarizer, TokenUsage};
use crate::config::GlobalConfig;
use crate::driver::PaneFactory;
use crate::exit_codes;
use crate::models::pane::PaneInfo;
use crate::models::plan::{Plan, SubtaskStatus};
use crate::models::result::SubtaskResult;
use crate::orchestrator::scheduler::Scheduler;
use crate::orchestrator::session_registry::{PaneHealth, Session};
use crate::orchestrator::worker::{PaneWorker, WorkerSettings};
use crate::{AppError, Result};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Task description.
    pub task: String,
    /// One result per subtask, ordered by id.
    pub results: Vec<SubtaskResult>,
    /// Pane each subtask was bound to.
    pub panes: BTreeMap<String, String>,
    /// Summarizer output.
    pub summary: String,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Decider tokens spent across every subtask.
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for result in &self.results {
            usage.add(TokenUsage {
                prompt_tokens: result.prompt_tokens,
                completion_tokens: result.completion_tokens,
            });
        }
        usage
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        let any_succeeded = self
            .results
            .iter()
            .any(|r| r.status == SubtaskStatus::Succeeded);
        if self.results.is_empty() || any_succeeded {
            exit_codes::OK
        } else {
            exit_codes::NO_SUCCESS
        }
    }

    /// Summary followed by a deterministic outcome listing.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{}\n\nOutcomes:\n", self.summary.trim_end());
        if self.results.is_empty() {
            out.push_str("  (no subtasks)\n");
        }
        for result in &self.results {
            let pane = self
                .panes
                .get(&result.subtask_id)
                .map_or("-", String::as_str);
            out.push_str(&format!(
                "  [{}] {:<9} pane={} turns={}",
                result.subtask_id,
                result.status.as_str(),
                pane,
                result.turns_used
            ));
            if let Some(reason) = &result.error {
                out.push_str(&format!(" reason: {reason}"));
            } else if let Some(ancestor) = &result.blocked_by {
                out.push_str(&format!(" blocked by: {ancestor}"));
            } else if result.status == SubtaskStatus::Skipped {
                out.push_str(&format!(" reason: {}", result.summary_text));
            }
            out.push('\n');
        }
        let usage = self.usage();
        out.push_str(&format!(
            "Elapsed: {:.1}s | Tokens: {} prompt + {} completion",
            self.elapsed.as_secs_f64(),
            usage.prompt_tokens,
            usage.completion_tokens
        ));
        out
    }
}

/// Exit code for a run that ended in an error.
#[must_use]
pub fn exit_code_for(err: &AppError) -> i32 {
    match err {
        AppError::Plan(_) => exit_codes::PLAN_INVALID,
        _ => exit_codes::RUNTIME,
    }
}

/// Wires the collaborators together for one run.
pub struct Orchestrator {
    config: GlobalConfig,
    profile: Vec<PaneInfo>,
    planner: Arc<dyn Planner>,
    decider: Arc<dyn ActionDecider>,
    summarizer: Arc<dyn Summarizer>,
    factory: Arc<dyn PaneFactory>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Orchestrator for `profile` using the given collaborators.
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        profile: Vec<PaneInfo>,
        planner: Arc<dyn Planner>,
        decider: Arc<dyn ActionDecider>,
        summarizer: Arc<dyn Summarizer>,
        factory: Arc<dyn PaneFactory>,
    ) -> Self {
        Self {
            config,
            profile,
            planner,
            decider,
            summarizer,
            factory,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` as the operator abort signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute `task` end to end.
    ///
    /// The plan is produced and validated before any pane exists, so an
    /// invalid plan has no side effects. Once created, the session is torn
    /// down on every exit path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Plan` for an invalid plan, and `AppError::Planner`,
    /// `AppError::Llm`, `AppError::Pane` or `AppError::Config` when planning
    /// or session creation fails.
    pub async fn run(&self, task: &str) -> Result<RunReport> {
        let span = info_span!("run", profile_panes = self.profile.len());
        self.run_inner(task).instrument(span).await
    }

    async fn run_inner(&self, task: &str) -> Result<RunReport> {
        let started = Instant::now();

        let mut plan = tokio::select! {
            plan = self.planner.plan(task, &self.profile) => plan?,
            () = self.cancel.cancelled() => {
                return Err(AppError::Planner("aborted by operator during planning".into()));
            }
        };
        log_plan(&plan);

        let panes: BTreeMap<String, String> = plan
            .subtasks()
            .map(|s| (s.id.clone(), s.assigned_pane.clone()))
            .collect();

        let results = if plan.is_empty() {
            info!("plan is empty, nothing to schedule");
            Vec::new()
        } else {
            let session =
                Arc::new(Session::create(&self.profile, Arc::clone(&self.factory)).await?);
            let results = self.execute(&session, &mut plan).await;
            session.teardown().await;
            results
        };

        let summary = match self.summarizer.summarize(task, &results).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "summarizer failed, using plain summary");
                PlainSummarizer::render(task, &results)
            }
        };

        Ok(RunReport {
            task: task.to_owned(),
            results,
            panes,
            summary,
            elapsed: started.elapsed(),
        })
    }

    async fn execute(&self, session: &Arc<Session>, plan: &mut Plan) -> Vec<SubtaskResult> {
        let prompt = self.config.prompt_regex();
        if let Ok(prompt) = &prompt {
            for (name, health) in session.health(prompt).await {
                match health {
                    PaneHealth::Ready => info!(pane = %name, "pane ready"),
                    PaneHealth::NotReady => warn!(pane = %name, "pane not showing its prompt yet"),
                    PaneHealth::Unavailable(reason) => {
                        warn!(pane = %name, %reason, "pane unavailable");
                    }
                }
            }
        }

        let worker = PaneWorker::new(
            Arc::clone(session),
            Arc::clone(&self.decider),
            WorkerSettings::from_config(&self.config),
            self.cancel.clone(),
        );
        let scheduler = Scheduler::new(
            Arc::new(worker),
            self.config.scheduler.max_parallel,
            self.cancel.clone(),
        );
        scheduler.run(plan).await
    }
}

fn log_plan(plan: &Plan) {
    info!(subtasks = plan.len(), "plan validated");
    for subtask in plan.subtasks() {
        let deps: Vec<&str> = subtask.dependency_ids.iter().map(String::as_str).collect();
        info!(
            subtask_id = %subtask.id,
            pane = %subtask.assigned_pane,
            depends_on = %deps.join(","),
            description = %subtask.description,
            "planned subtask"
        );
    }
    let roots: Vec<&str> = plan.roots().iter().map(|s| s.id.as_str()).collect();
    if roots.len() > 1 {
        info!(roots = %roots.join(","), "parallel start");
    }
}
