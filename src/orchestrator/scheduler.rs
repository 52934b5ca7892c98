//! DAG scheduler.
//!
//! Launches one worker per ready subtask, bounded by `max_parallel`, never
//! runs two subtasks on the same pane at once, and cascades a failure to
//! every transitive dependent as `Skipped`. Subtask status lives in the
//! [`Plan`] and is only written from the scheduling loop.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::plan::{Plan, Subtask, SubtaskStatus};
use crate::models::result::{FailureReason, SubtaskResult};

/// Boxed future returned by [`SubtaskRunner::run`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = SubtaskResult> + Send + 'a>>;

/// Executes one subtask and reports its result.
pub trait SubtaskRunner: Send + Sync {
    /// Run `subtask`; `dependencies` holds the results of its (succeeded)
    /// dependencies. Must produce exactly one result and never fail.
    fn run<'a>(&'a self, subtask: &'a Subtask, dependencies: &'a [SubtaskResult]) -> RunFuture<'a>;
}

/// Dependency-ordered, pane-exclusive subtask scheduler.
pub struct Scheduler {
    runner: Arc<dyn SubtaskRunner>,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Scheduler running at most `max_parallel` workers at once.
    #[must_use]
    pub fn new(runner: Arc<dyn SubtaskRunner>, max_parallel: usize, cancel: CancellationToken) -> Self {
        Self {
            runner,
            max_parallel: max_parallel.max(1),
            cancel,
        }
    }

    /// Execute every subtask of `plan` and return one result per subtask id,
    /// ordered by id.
    ///
    /// Launch order among simultaneously ready subtasks is ascending id.
    pub async fn run(&self, plan: &mut Plan) -> Vec<SubtaskResult> {
        let span = info_span!("schedule", subtasks = plan.len(), max_parallel = self.max_parallel);
        self.run_inner(plan).instrument(span).await
    }

    async fn run_inner(&self, plan: &mut Plan) -> Vec<SubtaskResult> {
        let mut state = ScheduleState::new(plan);
        let mut in_flight: JoinSet<(String, SubtaskResult)> = JoinSet::new();

        loop {
            if self.cancel.is_cancelled() {
                if !state.ready.is_empty() {
                    warn!(pending = state.ready.len(), "run cancelled, not launching more subtasks");
                }
            } else {
                self.launch_ready(plan, &mut state, &mut in_flight);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((id, result)) => state.apply(plan, &id, result),
                Err(err) => error!(%err, "worker task lost"),
            }
        }

        state.finish(plan, self.cancel.is_cancelled())
    }

    fn launch_ready(
        &self,
        plan: &mut Plan,
        state: &mut ScheduleState,
        in_flight: &mut JoinSet<(String, SubtaskResult)>,
    ) {
        let candidates: Vec<String> = state.ready.iter().cloned().collect();
        for id in candidates {
            if in_flight.len() >= self.max_parallel {
                break;
            }
            let Some(subtask) = plan.get(&id).cloned() else {
                continue;
            };
            // Pane busy: stays ready until the holder finishes.
            if !state.busy_panes.insert(subtask.assigned_pane.clone()) {
                continue;
            }
            state.ready.remove(&id);
            state.running.insert(id.clone());
            plan.set_status(&id, SubtaskStatus::Running);

            let dependencies: Vec<SubtaskResult> = subtask
                .dependency_ids
                .iter()
                .filter_map(|dep| state.results.get(dep).cloned())
                .collect();
            info!(subtask_id = %id, pane = %subtask.assigned_pane, "subtask started");

            let runner = Arc::clone(&self.runner);
            in_flight.spawn(async move {
                let outcome = AssertUnwindSafe(runner.run(&subtask, &dependencies))
                    .catch_unwind()
                    .await;
                let result = outcome.unwrap_or_else(|panic| {
                    let msg = panic_message(panic.as_ref());
                    error!(subtask_id = %subtask.id, %msg, "worker panicked");
                    SubtaskResult::failed(&subtask.id, FailureReason::WorkerPanicked(msg), 0)
                });
                (subtask.id, result)
            });
        }
    }
}

struct ScheduleState {
    results: BTreeMap<String, SubtaskResult>,
    unmet: BTreeMap<String, usize>,
    ready: BTreeSet<String>,
    running: BTreeSet<String>,
    busy_panes: BTreeSet<String>,
}

impl ScheduleState {
    fn new(plan: &mut Plan) -> Self {
        let unmet: BTreeMap<String, usize> = plan
            .subtasks()
            .map(|s| (s.id.clone(), s.dependency_ids.len()))
            .collect();
        let ready: BTreeSet<String> = unmet
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ready {
            plan.set_status(id, SubtaskStatus::Ready);
        }
        Self {
            results: BTreeMap::new(),
            unmet,
            ready,
            running: BTreeSet::new(),
            busy_panes: BTreeSet::new(),
        }
    }

    fn apply(&mut self, plan: &mut Plan, id: &str, mut result: SubtaskResult) {
        if !self.running.remove(id) {
            warn!(subtask_id = %id, "result for a subtask that was not running");
            return;
        }
        if let Some(subtask) = plan.get(id) {
            self.busy_panes.remove(&subtask.assigned_pane);
        }
        // Workers only succeed or fail; anything else counts as a failure.
        if result.status != SubtaskStatus::Succeeded && result.status != SubtaskStatus::Failed {
            result.status = SubtaskStatus::Failed;
        }
        let status = result.status;
        info!(
            subtask_id = %id,
            status = status.as_str(),
            turns = result.turns_used,
            "subtask finished"
        );
        plan.set_status(id, status);
        self.results.insert(id.to_owned(), result);

        if status == SubtaskStatus::Succeeded {
            for dependent in plan.dependents(id).to_vec() {
                let Some(count) = self.unmet.get_mut(&dependent) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 && plan.status(&dependent) == Some(SubtaskStatus::Pending) {
                    plan.set_status(&dependent, SubtaskStatus::Ready);
                    self.ready.insert(dependent);
                }
            }
        } else {
            for dependent in plan.transitive_dependents(id) {
                if self.results.contains_key(&dependent) {
                    continue;
                }
                info!(subtask_id = %dependent, blocked_by = %id, "subtask skipped");
                self.ready.remove(&dependent);
                plan.set_status(&dependent, SubtaskStatus::Skipped);
                self.results
                    .insert(dependent.clone(), SubtaskResult::skipped(&dependent, id));
            }
        }
    }

    fn finish(mut self, plan: &mut Plan, cancelled: bool) -> Vec<SubtaskResult> {
        let leftover: Vec<String> = plan
            .ids()
            .filter(|id| !self.results.contains_key(*id))
            .map(str::to_owned)
            .collect();
        for id in leftover {
            let result = if self.running.contains(&id) {
                SubtaskResult::failed(
                    &id,
                    FailureReason::WorkerPanicked("worker task lost".into()),
                    0,
                )
            } else {
                if !cancelled {
                    error!(subtask_id = %id, "subtask never became ready");
                }
                SubtaskResult::cancelled_before_start(&id)
            };
            plan.set_status(&id, result.status);
            self.results.insert(id, result);
        }
        self.results.into_values().collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
