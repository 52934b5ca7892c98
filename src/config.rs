//! Global configuration parsing and validation.
//!
//! Every field has a default, so an absent config file yields a usable
//! configuration. Values are validated once after parsing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::models::pane::PaneInfo;
use crate::profiles;
use crate::{AppError, Result};

/// Largest timeout accepted anywhere in the configuration, in seconds.
pub const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;

/// Scheduler limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Maximum number of workers in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Default turn budget per subtask.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Whether workers show the decider the screens of the other panes.
    #[serde(default = "default_true")]
    pub share_peer_screens: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_turns: default_max_turns(),
            share_peer_screens: true,
        }
    }
}

/// Completion detection tuning.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DetectionConfig {
    /// Delay between screen polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ceiling after which a detection call settles by force.
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: f64,
    /// Idle timeout for panes that do not set their own.
    #[serde(default = "default_idle_timeout_seconds")]
    pub default_idle_timeout_seconds: f64,
    /// Consecutive forced settles after which a subtask fails; 0 disables.
    #[serde(default = "default_max_consecutive_forced_settles")]
    pub max_consecutive_forced_settles: u32,
    /// Regex matched against the last non-empty screen line.
    #[serde(default = "default_prompt_pattern")]
    pub prompt_pattern: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_seconds: default_max_wait_seconds(),
            default_idle_timeout_seconds: default_idle_timeout_seconds(),
            max_consecutive_forced_settles: default_max_consecutive_forced_settles(),
            prompt_pattern: default_prompt_pattern(),
        }
    }
}

impl DetectionConfig {
    /// Delay between screen polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wait ceiling for one detection call.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        seconds_or(self.max_wait_seconds, default_max_wait_seconds())
    }

    /// Idle timeout used when a pane sets none.
    #[must_use]
    pub fn default_idle_timeout(&self) -> Duration {
        seconds_or(
            self.default_idle_timeout_seconds,
            default_idle_timeout_seconds(),
        )
    }
}

/// Terminal multiplexer session settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// tmux session name.
    #[serde(default = "default_session_name")]
    pub name: String,
    /// tmux executable.
    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
    /// Shared scratch directory created in the first pane.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Shell prompt installed in every pane.
    #[serde(default = "default_ready_prompt")]
    pub ready_prompt: String,
    /// Grace period before configuring a freshly connected remote shell.
    #[serde(default = "default_remote_connect_timeout")]
    pub remote_connect_timeout_seconds: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            tmux_binary: default_tmux_binary(),
            working_dir: default_working_dir(),
            ready_prompt: default_ready_prompt(),
            remote_connect_timeout_seconds: default_remote_connect_timeout(),
        }
    }
}

impl SessionConfig {
    /// Remote connection grace period.
    #[must_use]
    pub fn remote_connect_timeout(&self) -> Duration {
        seconds_or(
            self.remote_connect_timeout_seconds,
            default_remote_connect_timeout(),
        )
    }
}

/// Language model endpoint family.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// `api.openai.com`.
    Openai,
    /// Anthropic messages API.
    Anthropic,
    /// Gemini's OpenAI-compatible endpoint.
    Gemini,
    /// `openrouter.ai`.
    Openrouter,
    /// Local LM Studio server.
    Lmstudio,
    /// Local Ollama server.
    Ollama,
}

impl LlmProvider {
    /// Parse a provider name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "openrouter" => Ok(Self::Openrouter),
            "lmstudio" => Ok(Self::Lmstudio),
            "ollama" => Ok(Self::Ollama),
            other => Err(AppError::Config(format!("unknown llm provider {other}"))),
        }
    }

    /// Default API base URL.
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Openrouter => "https://openrouter.ai/api/v1",
            Self::Lmstudio => "http://localhost:1234/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    #[must_use]
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GOOGLE_API_KEY"),
            Self::Openrouter => Some("OPENROUTER_API_KEY"),
            Self::Lmstudio | Self::Ollama => None,
        }
    }

    /// Model used when none is configured.
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Openai => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.0-flash",
            Self::Openrouter => "z-ai/glm-5",
            Self::Lmstudio => "local",
            Self::Ollama => "llama3",
        }
    }
}

/// Language model client settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// Endpoint family.
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Completion token cap per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Corrective re-asks after a malformed decider response.
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            max_parse_retries: default_max_parse_retries(),
        }
    }
}

impl LlmConfig {
    /// Effective model name.
    #[must_use]
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Effective base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.base_url())
            .trim_end_matches('/')
    }

    /// Apply `PANEFLOW_LLM_PROVIDER` / `PANEFLOW_MODEL` overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the provider override is unknown.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(provider) = std::env::var("PANEFLOW_LLM_PROVIDER") {
            if !provider.trim().is_empty() {
                self.provider = LlmProvider::parse(&provider)?;
            }
        }
        if let Ok(model) = std::env::var("PANEFLOW_MODEL") {
            if !model.trim().is_empty() {
                self.model = Some(model);
            }
        }
        Ok(())
    }
}

/// A user-defined tool profile.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ProfileConfig {
    /// Ordered pane descriptors.
    pub panes: Vec<PaneInfo>,
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_turns() -> u32 {
    15
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_wait_seconds() -> f64 {
    30.0
}

fn default_idle_timeout_seconds() -> f64 {
    2.0
}

fn default_max_consecutive_forced_settles() -> u32 {
    5
}

fn default_prompt_pattern() -> String {
    r"\[AGENT_READY\] \$\s*$".into()
}

fn default_session_name() -> String {
    "paneflow".into()
}

fn default_tmux_binary() -> String {
    "tmux".into()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp/paneflow")
}

fn default_ready_prompt() -> String {
    "[AGENT_READY] $ ".into()
}

fn default_remote_connect_timeout() -> f64 {
    3.0
}

fn default_provider() -> LlmProvider {
    LlmProvider::Openrouter
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_parse_retries() -> u32 {
    2
}

fn default_profile() -> String {
    profiles::DEFAULT_PROFILE.into()
}

/// Global configuration parsed from `paneflow.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Scheduler limits.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Completion detection tuning.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Multiplexer session settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Language model client settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Profile used when none is selected on the command line.
    #[serde(default = "default_profile")]
    pub default_profile: String,
    /// User-defined profiles, merged over the built-in ones.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            detection: DetectionConfig::default(),
            session: SessionConfig::default(),
            llm: LlmConfig::default(),
            default_profile: default_profile(),
            profiles: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a profile by name: user-defined first, then built-in.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` listing the available names.
    pub fn profile(&self, name: &str) -> Result<Vec<PaneInfo>> {
        if let Some(custom) = self.profiles.get(name) {
            return Ok(custom.panes.clone());
        }
        profiles::builtin(name).ok_or_else(|| {
            AppError::NotFound(format!(
                "unknown profile {name:?} (available: {})",
                self.profile_names().join(", ")
            ))
        })
    }

    /// Every selectable profile name, sorted and deduplicated.
    #[must_use]
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = profiles::builtin_names()
            .into_iter()
            .map(str::to_owned)
            .chain(self.profiles.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Compile the global prompt pattern.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern is not a valid regex.
    pub fn prompt_regex(&self) -> Result<Regex> {
        compile_prompt(&self.detection.prompt_pattern)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.max_parallel == 0 {
            return Err(AppError::Config(
                "scheduler.max_parallel must be greater than zero".into(),
            ));
        }
        if self.scheduler.max_turns == 0 {
            return Err(AppError::Config(
                "scheduler.max_turns must be greater than zero".into(),
            ));
        }
        if self.detection.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "detection.poll_interval_ms must be greater than zero".into(),
            ));
        }
        check_seconds(
            "detection.max_wait_seconds",
            self.detection.max_wait_seconds,
            false,
        )?;
        check_seconds(
            "detection.default_idle_timeout_seconds",
            self.detection.default_idle_timeout_seconds,
            false,
        )?;
        check_seconds(
            "session.remote_connect_timeout_seconds",
            self.session.remote_connect_timeout_seconds,
            true,
        )?;
        self.prompt_regex()?;

        for (name, profile) in &self.profiles {
            validate_profile(name, &profile.panes)?;
        }

        if !self.profile_names().contains(&self.default_profile) {
            return Err(AppError::Config(format!(
                "default_profile {:?} is not defined",
                self.default_profile
            )));
        }
        Ok(())
    }
}

/// Compile a prompt pattern with a config-flavoured error.
///
/// # Errors
///
/// Returns `AppError::Config` if the pattern is not a valid regex.
pub fn compile_prompt(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|err| AppError::Config(format!("invalid prompt pattern {pattern:?}: {err}")))
}

fn validate_profile(name: &str, panes: &[PaneInfo]) -> Result<()> {
    if panes.is_empty() {
        return Err(AppError::Config(format!("profile {name} has no panes")));
    }
    let mut seen = std::collections::BTreeSet::new();
    for pane in panes {
        if pane.name.trim().is_empty() {
            return Err(AppError::Config(format!(
                "profile {name} has a pane with an empty name"
            )));
        }
        if !seen.insert(pane.name.as_str()) {
            return Err(AppError::Config(format!(
                "profile {name} declares pane {} twice",
                pane.name
            )));
        }
        if let Some(pattern) = &pane.prompt_pattern {
            compile_prompt(pattern)?;
        }
        if let Some(secs) = pane.idle_timeout {
            check_seconds(&format!("profiles.{name}.{}.idle_timeout", pane.name), secs, false)?;
        }
        if let Some(secs) = pane.connect_timeout {
            check_seconds(
                &format!("profiles.{name}.{}.connect_timeout", pane.name),
                secs,
                true,
            )?;
        }
    }
    Ok(())
}

/// Reject timeouts that are not finite, exceed [`MAX_TIMEOUT_SECONDS`], or
/// fall below the floor (zero allowed only with `allow_zero`).
fn check_seconds(field: &str, value: f64, allow_zero: bool) -> Result<()> {
    let above_floor = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if value.is_finite()
        && above_floor
        && value <= MAX_TIMEOUT_SECONDS
        && Duration::try_from_secs_f64(value).is_ok()
    {
        return Ok(());
    }
    let floor = if allow_zero { "at least 0" } else { "greater than 0" };
    Err(AppError::Config(format!(
        "{field} must be {floor} and at most {MAX_TIMEOUT_SECONDS} seconds"
    )))
}

/// `secs` as a duration, or `fallback` seconds when `secs` is unrepresentable.
fn seconds_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or_default()
}
