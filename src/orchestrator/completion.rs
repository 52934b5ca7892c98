//! Completion detection after an injection.
//!
//! A [`CompletionDetector`] polls a pane until it judges the output settled,
//! using one of three strategies selected per pane:
//!
//! - **Marker**: the injected command is wrapped so a unique sentinel is
//!   printed when it finishes; the sentinel and the wrapper are stripped from
//!   the returned screen (see [`clean_screen`]).
//! - **Prompt**: the last non-empty screen line matches the prompt pattern
//!   and the screen differs from the pre-injection baseline.
//! - **Idle**: the screen has been byte-identical for the pane's idle timeout.
//!
//! Every call is bounded by a wait ceiling. Reaching it yields a
//! [`Settlement`] with `forced = true`, which is an observation and not an
//! error.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{compile_prompt, DetectionConfig};
use crate::driver::Pane;
use crate::models::pane::{DetectionStrategy, PaneInfo};
use crate::Result;

const MARKER_PREFIX: &str = "___DONE_";
const MARKER_SUFFIX: &str = "___";

/// Printed sentinel of any subtask, as produced by [`new_marker`].
#[allow(clippy::expect_used)]
static SENTINEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"___DONE_[A-Za-z0-9_-]*?_[0-9a-f]{8}___").expect("static regex is valid")
});

/// Sentinel print appended by [`wrap_command`], as echoed on the command line.
#[allow(clippy::expect_used)]
static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:; | )printf '%s%s\\n' '___DONE_[A-Za-z0-9_-]*' '[A-Za-z0-9_-]*___'")
        .expect("static regex is valid")
});

/// Outcome of one detection call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Screen at the moment of settling, sentinel removed.
    pub screen: String,
    /// Strategy that produced the settle.
    pub strategy: DetectionStrategy,
    /// Whether the wait ceiling forced the settle.
    pub forced: bool,
    /// Time spent polling.
    pub waited: Duration,
}

/// Keystrokes to inject plus the sentinel to wait for, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    /// Text handed to [`Pane::inject`], newline-terminated.
    pub keys: String,
    /// Sentinel printed when the command finishes (marker strategy only).
    pub marker: Option<String>,
}

/// Per-pane settle classifier.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    strategy: DetectionStrategy,
    poll_interval: Duration,
    max_wait: Duration,
    idle_timeout: Duration,
    prompt: Regex,
}

impl CompletionDetector {
    /// Detector with explicit timing; the prompt pattern is the default one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the default prompt pattern fails to
    /// compile.
    pub fn new(
        strategy: DetectionStrategy,
        poll_interval: Duration,
        max_wait: Duration,
        idle_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            strategy,
            poll_interval,
            max_wait,
            idle_timeout,
            prompt: compile_prompt(&DetectionConfig::default().prompt_pattern)?,
        })
    }

    /// Detector configured for `info`, falling back to `config` for anything
    /// the pane leaves unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a prompt pattern fails to compile.
    pub fn for_pane(info: &PaneInfo, config: &DetectionConfig) -> Result<Self> {
        let pattern = info
            .prompt_pattern
            .as_deref()
            .unwrap_or(&config.prompt_pattern);
        Ok(Self {
            strategy: info.detection(),
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
            idle_timeout: info.idle_timeout(config.default_idle_timeout()),
            prompt: compile_prompt(pattern)?,
        })
    }

    /// Replace the prompt pattern.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Regex) -> Self {
        self.prompt = prompt;
        self
    }

    /// Strategy in use.
    #[must_use]
    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    /// Turn a keystroke sequence into the text to inject.
    ///
    /// Under the marker strategy the command is wrapped with a fresh sentinel
    /// scoped to `subtask_id`.
    #[must_use]
    pub fn prepare(&self, subtask_id: &str, keys: &str) -> PreparedInput {
        match self.strategy {
            DetectionStrategy::Marker => {
                let marker = new_marker(subtask_id);
                PreparedInput {
                    keys: format!("{}\n", wrap_command(keys, &marker)),
                    marker: Some(marker),
                }
            }
            DetectionStrategy::Prompt | DetectionStrategy::Idle => PreparedInput {
                keys: format!("{keys}\n"),
                marker: None,
            },
        }
    }

    /// Poll `pane` until it settles or the wait ceiling is reached.
    ///
    /// `baseline` is the screen captured before the injection; `marker` is
    /// the sentinel returned by [`prepare`](Self::prepare).
    ///
    /// # Errors
    ///
    /// Propagates capture failures from the pane.
    pub async fn wait(
        &self,
        pane: &dyn Pane,
        baseline: &str,
        marker: Option<&str>,
    ) -> Result<Settlement> {
        let start = Instant::now();
        // An unrepresentable ceiling never forces a settle.
        let deadline = start.checked_add(self.max_wait);
        let mut last_screen: Option<String> = None;
        let mut unchanged_since = start;

        loop {
            let screen = pane.capture().await?;
            let now = Instant::now();

            let settled = match self.strategy {
                DetectionStrategy::Marker => marker.map_or_else(
                    || screen != baseline && self.prompt_ready(&screen),
                    |m| screen.contains(m),
                ),
                DetectionStrategy::Prompt => screen != baseline && self.prompt_ready(&screen),
                DetectionStrategy::Idle => {
                    if last_screen.as_deref() == Some(screen.as_str()) {
                        now.duration_since(unchanged_since) >= self.idle_timeout
                    } else {
                        unchanged_since = now;
                        false
                    }
                }
            };

            if settled || deadline.is_some_and(|d| now >= d) {
                let waited = now.duration_since(start);
                let forced = !settled;
                if forced {
                    warn!(
                        pane = pane.name(),
                        strategy = self.strategy.as_str(),
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        "detection ceiling reached, forcing settle"
                    );
                } else {
                    debug!(
                        pane = pane.name(),
                        strategy = self.strategy.as_str(),
                        "pane settled"
                    );
                }
                let mut screen = clean_screen(&screen);
                if let Some(m) = marker {
                    screen = strip_marker(&screen, m);
                }
                return Ok(Settlement {
                    screen,
                    strategy: self.strategy,
                    forced,
                    waited,
                });
            }

            last_screen = Some(screen);
            let pause = deadline.map_or(self.poll_interval, |d| {
                self.poll_interval.min(d.saturating_duration_since(now))
            });
            tokio::time::sleep(pause).await;
        }
    }

    fn prompt_ready(&self, screen: &str) -> bool {
        last_non_empty_line(screen).is_some_and(|line| self.prompt.is_match(line))
    }
}

/// Fresh sentinel for one injection of `subtask_id`.
#[must_use]
pub fn new_marker(subtask_id: &str) -> String {
    let id: String = subtask_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{MARKER_PREFIX}{id}_{}{MARKER_SUFFIX}", &nonce[..8])
}

/// Append a sentinel print to `command`.
///
/// The sentinel is printed in two quoted halves so the echoed command line
/// never contains it verbatim; only the command's completion can produce it.
#[must_use]
pub fn wrap_command(command: &str, marker: &str) -> String {
    let command = command.trim_end();
    let split = marker.len() / 2;
    let (left, right) = marker.split_at(split);
    let sep = if command.ends_with('&') || command.ends_with(';') {
        " "
    } else {
        "; "
    };
    format!("{command}{sep}printf '%s%s\\n' '{left}' '{right}'")
}

/// Remove every occurrence of `marker` from `screen`.
#[must_use]
pub fn strip_marker(screen: &str, marker: &str) -> String {
    screen.replace(marker, "")
}

/// Remove every trace of completion sentinels from `screen`.
///
/// Echoed wrapper prints are cut from command lines and sentinels are
/// removed wherever they appear; a line holding nothing but a sentinel is
/// dropped. Applies to sentinels of any subtask, so it is safe on screens
/// captured long after the injection that produced them.
#[must_use]
pub fn clean_screen(screen: &str) -> String {
    if !screen.contains(MARKER_PREFIX) {
        return screen.to_owned();
    }
    let mut cleaned = String::with_capacity(screen.len());
    for line in screen.split_inclusive('\n') {
        let body = line.strip_suffix('\n').unwrap_or(line);
        let unwrapped = WRAPPER_RE.replace_all(body, "");
        let stripped = SENTINEL_RE.replace_all(&unwrapped, "");
        if stripped.trim().is_empty() && !body.trim().is_empty() {
            continue;
        }
        cleaned.push_str(&stripped);
        if line.ends_with('\n') {
            cleaned.push('\n');
        }
    }
    cleaned
}

/// Last line of `screen` with non-whitespace content, right-trimmed.
#[must_use]
pub fn last_non_empty_line(screen: &str) -> Option<&str> {
    screen
        .lines()
        .map(str::trim_end)
        .rev()
        .find(|line| !line.is_empty())
}
