//! tmux implementation of [`Pane`] and [`PaneFactory`].
//!
//! All panes of one run live as windows of a single detached tmux session.
//! Each pane is addressed by its stable tmux pane id (`%N`), so window
//! renames or reordering never change which process a worker talks to.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SessionConfig;
use crate::driver::{DriverFuture, Pane, PaneFactory};
use crate::models::pane::PaneInfo;
use crate::{AppError, Result};

/// Settle delay after configuring a freshly created local shell.
const LOCAL_SETUP_DELAY: Duration = Duration::from_millis(300);

/// `value` as one single-quoted POSIX shell word.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Thin wrapper around the tmux executable.
#[derive(Debug, Clone)]
struct Tmux {
    binary: String,
}

impl Tmux {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AppError::Pane(format!("failed to run {}: {err}", self.binary)))?;

        if !output.status.success() {
            return Err(AppError::Pane(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_literal(&self, target: &str, text: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, "-l", "--", text])
            .await
            .map(drop)
    }

    async fn send_enter(&self, target: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, "Enter"]).await.map(drop)
    }

    /// Type `line` and submit it.
    async fn send_line(&self, target: &str, line: &str) -> Result<()> {
        self.send_literal(target, line).await?;
        self.send_enter(target).await
    }

    async fn query(&self, target: &str, format: &str) -> Result<String> {
        let out = self
            .run(&["display-message", "-p", "-t", target, format])
            .await?;
        Ok(out.trim().to_owned())
    }
}

#[derive(Debug, Default)]
struct BackendState {
    session_started: bool,
    shut_down: bool,
}

/// Creates panes as windows of one detached tmux session.
#[derive(Debug)]
pub struct TmuxBackend {
    tmux: Tmux,
    config: SessionConfig,
    state: Mutex<BackendState>,
    /// Mirrors `state.session_started && !state.shut_down` for `Drop`.
    live: AtomicBool,
}

impl TmuxBackend {
    /// Backend for the session described by `config`.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            tmux: Tmux {
                binary: config.tmux_binary.clone(),
            },
            config,
            state: Mutex::new(BackendState::default()),
            live: AtomicBool::new(false),
        }
    }

    /// Name of the tmux session hosting every pane.
    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.config.name
    }

    async fn open_window(&self, info: &PaneInfo) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(AppError::Pane("tmux session already torn down".into()));
        }

        let session = self.config.name.as_str();
        let pane_id = if state.session_started {
            self.tmux
                .run(&[
                    "new-window", "-d", "-P", "-F", "#{pane_id}", "-t", session, "-n", &info.name,
                ])
                .await?
        } else {
            // A stale session from an earlier run would capture our windows.
            if self.tmux.run(&["kill-session", "-t", session]).await.is_ok() {
                warn!(session, "killed stale tmux session");
            }
            let id = self
                .tmux
                .run(&[
                    "new-session", "-d", "-P", "-F", "#{pane_id}", "-s", session, "-n", &info.name,
                    "-x", "200", "-y", "50",
                ])
                .await?;
            state.session_started = true;
            self.live.store(true, Ordering::SeqCst);
            info!(session, "tmux session created");
            id
        };

        let pane_id = pane_id.trim().to_owned();
        if pane_id.is_empty() {
            return Err(AppError::Pane(format!(
                "tmux returned no pane id for {}",
                info.name
            )));
        }
        Ok(pane_id)
    }

    async fn configure(&self, pane_id: &str, info: &PaneInfo) -> Result<()> {
        if let Some(host) = &info.host {
            let connect = info
                .startup_command
                .clone()
                .unwrap_or_else(|| format!("ssh {host}"));
            self.tmux.send_line(pane_id, &connect).await?;
            tokio::time::sleep(info.connect_timeout(self.config.remote_connect_timeout())).await;
            self.install_prompt(pane_id, info).await?;
            self.tmux.send_line(pane_id, "clear").await?;
        } else {
            let dir = shell_quote(&self.config.working_dir.display().to_string());
            self.tmux
                .send_line(pane_id, &format!("mkdir -p {dir} && cd {dir}"))
                .await?;
            self.install_prompt(pane_id, info).await?;
            self.tmux.send_line(pane_id, "clear").await?;
            // The program owns the screen from here on.
            if let Some(command) = &info.startup_command {
                self.tmux.send_line(pane_id, command).await?;
            }
            tokio::time::sleep(LOCAL_SETUP_DELAY).await;
        }
        Ok(())
    }

    async fn install_prompt(&self, pane_id: &str, info: &PaneInfo) -> Result<()> {
        let prompt = shell_quote(&self.config.ready_prompt);
        self.tmux
            .send_line(pane_id, &format!("export PS1={prompt}"))
            .await?;
        let title = shell_quote(&info.app_type);
        self.tmux
            .send_line(pane_id, &format!("printf '\\033]2;%s\\033\\\\' {title}"))
            .await
    }
}

impl PaneFactory for TmuxBackend {
    fn create<'a>(&'a self, info: &'a PaneInfo) -> DriverFuture<'a, Arc<dyn Pane>> {
        let span = info_span!("create_pane", pane = %info.name, remote = info.is_remote());
        Box::pin(
            async move {
                let pane_id = self.open_window(info).await?;
                self.configure(&pane_id, info).await?;

                let pane = TmuxPane {
                    id: pane_id,
                    info: info.clone(),
                    tmux: self.tmux.clone(),
                };
                if !pane.alive().await {
                    return Err(AppError::Pane(format!(
                        "pane {} exited during startup",
                        info.name
                    )));
                }
                info!(pane_id = %pane.id, "pane ready");
                Ok(Arc::new(pane) as Arc<dyn Pane>)
            }
            .instrument(span),
        )
    }

    fn shutdown(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.shut_down || !state.session_started {
                state.shut_down = true;
                return Ok(());
            }
            state.shut_down = true;
            self.live.store(false, Ordering::SeqCst);
            match self.tmux.run(&["kill-session", "-t", &self.config.name]).await {
                Ok(_) => {
                    info!(session = %self.config.name, "tmux session killed");
                    Ok(())
                }
                Err(err) => {
                    // Already gone (e.g. killed externally) counts as torn down.
                    debug!(%err, "kill-session failed");
                    Ok(())
                }
            }
        })
    }
}

impl Drop for TmuxBackend {
    fn drop(&mut self) {
        if self.live.swap(false, Ordering::SeqCst) {
            let _ = std::process::Command::new(&self.tmux.binary)
                .args(["kill-session", "-t", &self.config.name])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

/// One tmux pane.
#[derive(Debug)]
pub struct TmuxPane {
    id: String,
    info: PaneInfo,
    tmux: Tmux,
}

impl TmuxPane {
    /// tmux pane id (`%N`).
    #[must_use]
    pub fn pane_id(&self) -> &str {
        &self.id
    }

    async fn alive(&self) -> bool {
        // A vanished pane makes display-message fail; treat that as dead.
        matches!(self.tmux.query(&self.id, "#{pane_dead}").await.as_deref(), Ok("0"))
    }

    #[cfg(unix)]
    async fn pid(&self) -> Option<i32> {
        self.tmux
            .query(&self.id, "#{pane_pid}")
            .await
            .ok()
            .and_then(|raw| raw.parse().ok())
    }
}

impl Pane for TmuxPane {
    fn info(&self) -> &PaneInfo {
        &self.info
    }

    fn capture(&self) -> DriverFuture<'_, String> {
        Box::pin(async move { self.tmux.run(&["capture-pane", "-p", "-t", &self.id]).await })
    }

    fn inject<'a>(&'a self, keys: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut segments = keys.split('\n').peekable();
            while let Some(segment) = segments.next() {
                if !segment.is_empty() {
                    self.tmux.send_literal(&self.id, segment).await?;
                }
                if segments.peek().is_some() {
                    self.tmux.send_enter(&self.id).await?;
                }
            }
            Ok(())
        })
    }

    fn is_alive(&self) -> DriverFuture<'_, bool> {
        Box::pin(async move { Ok(self.alive().await) })
    }

    fn title(&self) -> DriverFuture<'_, String> {
        Box::pin(async move {
            let title = self.tmux.query(&self.id, "#T").await?;
            if title.is_empty() {
                Ok(self.info.app_type.clone())
            } else {
                Ok(title)
            }
        })
    }

    fn terminate(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            if !self.alive().await {
                return Ok(());
            }
            #[cfg(unix)]
            if let Some(pid) = self.pid().await {
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;

                // SIGHUP lets the shell forward the hangup to its jobs.
                if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGHUP) {
                    debug!(pane = %self.info.name, %err, "killpg failed");
                }
            }
            if let Err(err) = self.tmux.run(&["kill-pane", "-t", &self.id]).await {
                debug!(pane = %self.info.name, %err, "kill-pane failed");
            }
            Ok(())
        })
    }
}
