//! Declarative pane descriptor and per-pane completion strategy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the completion detector decides that a pane has settled after input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Wrap each command so a unique sentinel is printed when it finishes.
    Marker,
    /// Wait until the screen tail matches the configured prompt pattern.
    Prompt,
    /// Wait until the screen stops changing for the pane's idle timeout.
    Idle,
}

impl DetectionStrategy {
    /// Lowercase label used in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Prompt => "prompt",
            Self::Idle => "idle",
        }
    }
}

/// Declarative descriptor used to construct a pane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PaneInfo {
    /// Unique name within a session.
    pub name: String,
    /// Program to launch in the pane; absent means a bare interactive shell.
    #[serde(default)]
    pub startup_command: Option<String>,
    /// Free-form tag passed through to the action decider.
    pub app_type: String,
    /// Human-readable description shown to the planner and decider.
    #[serde(default)]
    pub description: String,
    /// Remote target reached through a forwarding channel; absent means local.
    #[serde(default)]
    pub host: Option<String>,
    /// Seconds without screen change that count as settled.
    #[serde(default)]
    pub idle_timeout: Option<f64>,
    /// Explicit completion strategy; derived from the pane shape when absent.
    #[serde(default)]
    pub detection: Option<DetectionStrategy>,
    /// Prompt regex overriding the global pattern for this pane.
    #[serde(default)]
    pub prompt_pattern: Option<String>,
    /// Seconds to wait for a remote connection before configuring the shell.
    #[serde(default)]
    pub connect_timeout: Option<f64>,
}

impl PaneInfo {
    /// Descriptor for a bare local shell.
    #[must_use]
    pub fn shell(name: &str, app_type: &str, description: &str) -> Self {
        Self {
            name: name.to_owned(),
            startup_command: None,
            app_type: app_type.to_owned(),
            description: description.to_owned(),
            host: None,
            idle_timeout: None,
            detection: None,
            prompt_pattern: None,
            connect_timeout: None,
        }
    }

    /// Whether the pane is reached through a remote forwarding channel.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Effective completion strategy.
    ///
    /// Bare shells (local or remote) cooperate with sentinel printing, a
    /// remote startup command ends in a configured shell prompt, and any other
    /// local program falls back to idle detection.
    #[must_use]
    pub fn detection(&self) -> DetectionStrategy {
        if let Some(strategy) = self.detection {
            return strategy;
        }
        match (&self.startup_command, &self.host) {
            (None, _) => DetectionStrategy::Marker,
            (Some(_), Some(_)) => DetectionStrategy::Prompt,
            (Some(_), None) => DetectionStrategy::Idle,
        }
    }

    /// Idle timeout, falling back to `default` when unset or not positive.
    #[must_use]
    pub fn idle_timeout(&self, default: Duration) -> Duration {
        self.idle_timeout
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(default)
    }

    /// Remote connection grace period, falling back to `default`.
    #[must_use]
    pub fn connect_timeout(&self, default: Duration) -> Duration {
        self.connect_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(default)
    }
}
