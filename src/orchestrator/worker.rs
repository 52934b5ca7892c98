//! Subtask worker: drives one subtask on its leased pane.
//!
//! Each turn captures the pane, asks the decider for an action, and either
//! finishes (complete / fail directive) or injects keystrokes and waits for
//! the pane to settle. Injections are never retried; the next turn's screen
//! is the only feedback. Every screen handed on is free of completion
//! sentinels.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::{ActionDecider, DecisionRequest, TokenUsage};
use crate::config::{DetectionConfig, GlobalConfig};
use crate::driver::Pane;
use crate::models::action::{Action, SettleRecord, TurnRecord};
use crate::models::plan::Subtask;
use crate::models::result::{FailureReason, SubtaskResult};
use crate::orchestrator::completion::{clean_screen, CompletionDetector};
use crate::orchestrator::scheduler::{RunFuture, SubtaskRunner};
use crate::orchestrator::session_registry::Session;

/// Limits applied to every worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Turn budget when the subtask sets none.
    pub max_turns: u32,
    /// Consecutive forced settles that fail the subtask; 0 disables.
    pub max_consecutive_forced_settles: u32,
    /// Show the decider the screens of the other panes.
    pub share_peer_screens: bool,
    /// Detection tuning.
    pub detection: DetectionConfig,
}

impl WorkerSettings {
    /// Settings taken from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_turns: config.scheduler.max_turns,
            max_consecutive_forced_settles: config.detection.max_consecutive_forced_settles,
            share_peer_screens: config.scheduler.share_peer_screens,
            detection: config.detection.clone(),
        }
    }
}

/// Runs subtasks against the panes of a session.
pub struct PaneWorker {
    session: Arc<Session>,
    decider: Arc<dyn ActionDecider>,
    settings: WorkerSettings,
    cancel: CancellationToken,
}

impl PaneWorker {
    /// Worker pool sharing `session` and `decider`.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        decider: Arc<dyn ActionDecider>,
        settings: WorkerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            decider,
            settings,
            cancel,
        }
    }

    /// Drive `subtask` to a result. Never fails; every problem becomes a
    /// `Failed` result.
    pub async fn run_subtask(
        &self,
        subtask: &Subtask,
        dependencies: &[SubtaskResult],
    ) -> SubtaskResult {
        let started_at = Utc::now();
        let mut run = TurnLoop::default();
        let outcome = self.drive(subtask, dependencies, &mut run).await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(reason) => SubtaskResult::failed(&subtask.id, reason, run.turns),
        }
        .with_snippet(&run.last_screen);
        result.prompt_tokens = run.usage.prompt_tokens;
        result.completion_tokens = run.usage.completion_tokens;
        result.started_at = Some(started_at);
        result.finished_at = Some(Utc::now());
        result
    }

    async fn drive(
        &self,
        subtask: &Subtask,
        dependencies: &[SubtaskResult],
        run: &mut TurnLoop,
    ) -> Result<SubtaskResult, FailureReason> {
        let lease = self
            .session
            .lease(&subtask.assigned_pane)
            .await
            .map_err(|err| FailureReason::PaneUnavailable(err.to_string()))?;
        let pane = lease.pane();
        let detector = CompletionDetector::for_pane(pane.info(), &self.settings.detection)
            .map_err(|err| FailureReason::PaneUnavailable(err.to_string()))?;
        let max_turns = subtask.max_turns.unwrap_or(self.settings.max_turns);
        let mut history: Vec<TurnRecord> = Vec::new();
        let mut consecutive_forced = 0_u32;

        for turn in 1..=max_turns {
            if self.cancel.is_cancelled() {
                info!(turn, "cancellation observed");
                return Err(FailureReason::Cancelled);
            }
            match pane.is_alive().await {
                Ok(true) => {}
                Ok(false) => return Err(FailureReason::PaneExited),
                Err(err) => return Err(FailureReason::PaneIo(err.to_string())),
            }

            let screen = pane
                .capture()
                .await
                .map_err(|err| FailureReason::PaneIo(err.to_string()))?;
            let visible = clean_screen(&screen);
            run.turns = turn;

            let screens = self.screens(pane, &visible).await;
            run.last_screen = visible;
            let title = pane
                .title()
                .await
                .unwrap_or_else(|_| pane.info().app_type.clone());
            let decision = self
                .decider
                .decide(DecisionRequest {
                    subtask,
                    pane: pane.info(),
                    pane_title: &title,
                    screens: &screens,
                    history: &history,
                    dependencies,
                    turn,
                    max_turns,
                })
                .await
                .map_err(|err| FailureReason::Decider(err.to_string()))?;
            run.usage.add(decision.usage);

            let keys = match decision.action {
                Action::Complete(summary) => {
                    info!(turn, "subtask declared complete");
                    return Ok(SubtaskResult::succeeded(&subtask.id, summary, turn));
                }
                Action::Fail(summary) => {
                    info!(turn, "subtask declared failed");
                    return Err(FailureReason::Declared(summary));
                }
                Action::Inject(keys) => keys,
            };

            let prepared = detector.prepare(&subtask.id, &keys);
            debug!(turn, keys = %keys, "injecting");
            pane.inject(&prepared.keys)
                .await
                .map_err(|err| FailureReason::PaneIo(err.to_string()))?;
            let settlement = detector
                .wait(pane, &screen, prepared.marker.as_deref())
                .await
                .map_err(|err| FailureReason::PaneIo(err.to_string()))?;
            run.last_screen = settlement.screen;

            history.push(TurnRecord {
                turn,
                action: Action::Inject(keys),
                settle: Some(SettleRecord {
                    strategy: settlement.strategy,
                    forced: settlement.forced,
                }),
            });

            if settlement.forced {
                consecutive_forced += 1;
                let limit = self.settings.max_consecutive_forced_settles;
                if limit > 0 && consecutive_forced >= limit {
                    warn!(turn, consecutive_forced, "pane keeps failing to settle");
                    return Err(FailureReason::Unsettled {
                        consecutive: consecutive_forced,
                    });
                }
            } else {
                consecutive_forced = 0;
            }
        }

        if let Ok(screen) = pane.capture().await {
            run.last_screen = clean_screen(&screen);
        }
        warn!(turns = max_turns, "turn budget exhausted");
        Err(FailureReason::BudgetExhausted { turns: max_turns })
    }

    async fn screens(&self, pane: &dyn Pane, own: &str) -> BTreeMap<String, String> {
        let mut screens = if self.settings.share_peer_screens {
            let mut peers = self.session.capture_peers(pane.name()).await;
            for screen in peers.values_mut() {
                *screen = clean_screen(screen);
            }
            peers
        } else {
            BTreeMap::new()
        };
        screens.insert(pane.name().to_owned(), own.to_owned());
        screens
    }
}

impl SubtaskRunner for PaneWorker {
    fn run<'a>(&'a self, subtask: &'a Subtask, dependencies: &'a [SubtaskResult]) -> RunFuture<'a> {
        let span = info_span!(
            "subtask",
            subtask_id = %subtask.id,
            pane = %subtask.assigned_pane
        );
        Box::pin(self.run_subtask(subtask, dependencies).instrument(span))
    }
}

/// Progress carried out of the turn loop regardless of how it ends.
#[derive(Debug, Default)]
struct TurnLoop {
    turns: u32,
    last_screen: String,
    usage: TokenUsage,
}
