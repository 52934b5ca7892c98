//! Session registry: the live set of panes for one run.
//!
//! The session owns every pane. Workers borrow a pane through a
//! [`PaneLease`], which holds the pane's mutual-exclusion lock until it is
//! dropped, so two workers never drive the same pane at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, info_span, warn, Instrument};

use crate::config::compile_prompt;
use crate::driver::{Pane, PaneFactory};
use crate::models::pane::{DetectionStrategy, PaneInfo};
use crate::orchestrator::completion::last_non_empty_line;
use crate::{AppError, Result};

struct PaneSlot {
    pane: Arc<dyn Pane>,
    lock: Arc<Mutex<()>>,
}

/// Readiness of one pane as reported by [`Session::health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneHealth {
    /// Alive and showing its ready prompt (or has no prompt requirement).
    Ready,
    /// Alive but the ready prompt is not on screen yet.
    NotReady,
    /// Creation failed or the process is gone.
    Unavailable(String),
}

/// Exclusive, scoped access to one pane.
pub struct PaneLease {
    pane: Arc<dyn Pane>,
    _guard: OwnedMutexGuard<()>,
}

impl PaneLease {
    /// The leased pane.
    #[must_use]
    pub fn pane(&self) -> &dyn Pane {
        self.pane.as_ref()
    }
}

impl std::fmt::Debug for PaneLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaneLease")
            .field("pane", &self.pane.name())
            .finish()
    }
}

/// Live set of panes for one run.
pub struct Session {
    infos: Vec<PaneInfo>,
    panes: BTreeMap<String, PaneSlot>,
    failed: BTreeMap<String, String>,
    factory: Arc<dyn PaneFactory>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("panes", &self.panes.keys().collect::<Vec<_>>())
            .field("failed", &self.failed)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create one pane per profile entry, in order.
    ///
    /// A pane whose creation fails is recorded as unavailable; subtasks bound
    /// to it fail without running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty profile or duplicate pane
    /// names, and `AppError::Pane` if every pane failed to start.
    pub async fn create(profile: &[PaneInfo], factory: Arc<dyn PaneFactory>) -> Result<Self> {
        if profile.is_empty() {
            return Err(AppError::Config("profile has no panes".into()));
        }
        let mut names = BTreeSet::new();
        for info in profile {
            if !names.insert(info.name.as_str()) {
                return Err(AppError::Config(format!(
                    "pane name {} declared twice",
                    info.name
                )));
            }
        }

        let span = info_span!("create_session", panes = profile.len());
        async move {
            let mut session = Self {
                infos: profile.to_vec(),
                panes: BTreeMap::new(),
                failed: BTreeMap::new(),
                factory,
                torn_down: AtomicBool::new(false),
            };

            for info in profile {
                match session.factory.create(info).await {
                    Ok(pane) => {
                        info!(pane = %info.name, app_type = %info.app_type, "pane created");
                        session.panes.insert(
                            info.name.clone(),
                            PaneSlot {
                                pane,
                                lock: Arc::new(Mutex::new(())),
                            },
                        );
                    }
                    Err(err) => {
                        warn!(pane = %info.name, %err, "pane creation failed");
                        session.failed.insert(info.name.clone(), err.to_string());
                    }
                }
            }

            if session.panes.is_empty() {
                let detail = session
                    .failed
                    .iter()
                    .map(|(name, err)| format!("{name}: {err}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                session.teardown().await;
                return Err(AppError::Pane(format!("no pane could be created ({detail})")));
            }
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Look up a live pane.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pane` if the pane failed to start, or
    /// `AppError::NotFound` if the name was never declared.
    pub fn pane(&self, name: &str) -> Result<Arc<dyn Pane>> {
        self.slot(name).map(|slot| Arc::clone(&slot.pane))
    }

    /// Acquire exclusive use of a pane, waiting while another worker holds it.
    ///
    /// # Errors
    ///
    /// Same as [`pane`](Self::pane).
    pub async fn lease(&self, name: &str) -> Result<PaneLease> {
        let slot = self.slot(name)?;
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        Ok(PaneLease {
            pane: Arc::clone(&slot.pane),
            _guard: guard,
        })
    }

    /// Declared pane names in profile order, including failed ones.
    #[must_use]
    pub fn pane_names(&self) -> Vec<&str> {
        self.infos.iter().map(|info| info.name.as_str()).collect()
    }

    /// Descriptors the session was created from.
    #[must_use]
    pub fn pane_infos(&self) -> &[PaneInfo] {
        &self.infos
    }

    /// Creation error for a pane that failed to start.
    #[must_use]
    pub fn unavailable_reason(&self, name: &str) -> Option<&str> {
        self.failed.get(name).map(String::as_str)
    }

    /// Per-pane readiness, in profile order.
    ///
    /// Marker and prompt panes are ready once the last screen line matches
    /// their prompt pattern (the pane's own, or `default_prompt`); idle panes
    /// are ready as soon as they are alive.
    pub async fn health(&self, default_prompt: &Regex) -> Vec<(String, PaneHealth)> {
        let mut report = Vec::with_capacity(self.infos.len());
        for info in &self.infos {
            let status = match self.panes.get(&info.name) {
                None => PaneHealth::Unavailable(
                    self.failed.get(&info.name).cloned().unwrap_or_default(),
                ),
                Some(slot) => Self::probe(slot.pane.as_ref(), info, default_prompt).await,
            };
            report.push((info.name.clone(), status));
        }
        report
    }

    async fn probe(pane: &dyn Pane, info: &PaneInfo, default_prompt: &Regex) -> PaneHealth {
        match pane.is_alive().await {
            Ok(true) => {}
            Ok(false) => return PaneHealth::Unavailable("process exited".into()),
            Err(err) => return PaneHealth::Unavailable(err.to_string()),
        }
        if info.detection() == DetectionStrategy::Idle {
            return PaneHealth::Ready;
        }
        let own = info.prompt_pattern.as_deref().map(compile_prompt);
        let prompt = match &own {
            Some(Ok(regex)) => regex,
            Some(Err(err)) => return PaneHealth::Unavailable(err.to_string()),
            None => default_prompt,
        };
        match pane.capture().await {
            Ok(screen) if last_non_empty_line(&screen).is_some_and(|l| prompt.is_match(l)) => {
                PaneHealth::Ready
            }
            Ok(_) => PaneHealth::NotReady,
            Err(err) => PaneHealth::Unavailable(err.to_string()),
        }
    }

    /// Current screens of every live pane except `except`, keyed by name.
    ///
    /// Panes that fail to capture are omitted. Peers are read without taking
    /// their lease.
    pub async fn capture_peers(&self, except: &str) -> BTreeMap<String, String> {
        let mut screens = BTreeMap::new();
        for (name, slot) in &self.panes {
            if name == except {
                continue;
            }
            if let Ok(screen) = slot.pane.capture().await {
                screens.insert(name.clone(), screen);
            }
        }
        screens
    }

    /// Terminate every pane and release backend resources.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let span = info_span!("teardown", panes = self.panes.len());
        async {
            for (name, slot) in &self.panes {
                if let Err(err) = slot.pane.terminate().await {
                    warn!(pane = %name, %err, "pane termination failed");
                }
            }
            if let Err(err) = self.factory.shutdown().await {
                warn!(%err, "backend shutdown failed");
            }
            info!("session torn down");
        }
        .instrument(span)
        .await;
    }

    /// Whether [`teardown`](Self::teardown) has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn slot(&self, name: &str) -> Result<&PaneSlot> {
        if let Some(slot) = self.panes.get(name) {
            return Ok(slot);
        }
        match self.failed.get(name) {
            Some(err) => Err(AppError::Pane(format!("pane {name} unavailable: {err}"))),
            None => Err(AppError::NotFound(format!("no pane named {name}"))),
        }
    }
}
