#![forbid(unsafe_code)]

//! `paneflow` binary.
//!
//! Loads configuration, selects a tool profile, then plans and executes the
//! task across tmux panes. The report goes to stdout, logs to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use paneflow::agent::client::{LlmClient, SharedChatModel};
use paneflow::agent::decider::LlmDecider;
use paneflow::agent::planner::LlmPlanner;
use paneflow::agent::summarizer::LlmSummarizer;
use paneflow::config::GlobalConfig;
use paneflow::driver::tmux::TmuxBackend;
use paneflow::orchestrator::runner::{exit_code_for, Orchestrator};
use paneflow::{exit_codes, AppError, Result};

const EXAMPLE_TASK: &str = "List all files in /tmp, show disk usage with du -sh /tmp/*, \
     and write a summary of what you find to /tmp/paneflow/summary.txt.";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "paneflow",
    about = "Plan a task and drive CLI tools through tmux panes",
    version,
    long_about = None
)]
struct Cli {
    /// Task for the agent to perform.
    #[arg(default_value = EXAMPLE_TASK)]
    task: String,

    /// Tool profile to run with.
    #[arg(short, long, value_name = "PROFILE")]
    profile: Option<String>,

    /// List available profiles and exit.
    #[arg(long)]
    list_profiles: bool,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the per-subtask turn budget.
    #[arg(long)]
    max_turns: Option<u32>,

    /// Override the number of subtasks run at once.
    #[arg(long)]
    max_parallel: Option<usize>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::from(1);
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    let code = outcome.unwrap_or_else(|err| {
        error!(%err, "paneflow failed");
        exit_code_for(&err)
    });
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: Cli) -> Result<i32> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.llm.apply_env_overrides()?;
    if let Some(max_turns) = args.max_turns {
        if max_turns == 0 {
            return Err(AppError::Config("--max-turns must be greater than zero".into()));
        }
        config.scheduler.max_turns = max_turns;
    }
    if let Some(max_parallel) = args.max_parallel {
        if max_parallel == 0 {
            return Err(AppError::Config(
                "--max-parallel must be greater than zero".into(),
            ));
        }
        config.scheduler.max_parallel = max_parallel;
    }

    if args.list_profiles {
        print_profiles(&config)?;
        return Ok(exit_codes::OK);
    }

    let profile_name = args
        .profile
        .clone()
        .unwrap_or_else(|| config.default_profile.clone());
    let profile = config.profile(&profile_name)?;
    info!(profile = %profile_name, panes = profile.len(), "profile selected");

    // ── Build collaborators ─────────────────────────────
    let client = LlmClient::from_config(&config.llm)?;
    info!(provider = ?config.llm.provider, model = %client.model(), "llm client ready");
    let model: SharedChatModel = Arc::new(client);
    let shared_dir = config.session.working_dir.display().to_string();

    let planner = Arc::new(LlmPlanner::new(Arc::clone(&model), shared_dir.clone()));
    let decider = Arc::new(LlmDecider::new(
        Arc::clone(&model),
        config.llm.max_tokens,
        config.llm.max_parse_retries,
        shared_dir,
    ));
    let summarizer = Arc::new(LlmSummarizer::new(model, config.llm.max_tokens));
    let factory = Arc::new(TmuxBackend::new(config.session.clone()));
    info!(
        "watch with: tmux attach -t {}",
        factory.session_name()
    );

    // ── Abort handling ──────────────────────────────────
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("abort requested, finishing current turns");
        signal_cancel.cancel();
    });

    let orchestrator =
        Orchestrator::new(config, profile, planner, decider, summarizer, factory)
            .with_cancellation(cancel);

    let report = orchestrator.run(&args.task).await?;
    println!("{}", report.render());
    Ok(report.exit_code())
}

fn print_profiles(config: &GlobalConfig) -> Result<()> {
    for name in config.profile_names() {
        let panes = config.profile(&name)?;
        let names: Vec<&str> = panes.iter().map(|p| p.name.as_str()).collect();
        let marker = if name == config.default_profile {
            " (default)"
        } else {
            ""
        };
        println!("  {name}{marker}: {}", names.join(", "));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
