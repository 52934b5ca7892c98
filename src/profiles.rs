//! Built-in tool profiles.
//!
//! A profile is a named, ordered list of [`PaneInfo`] records. Selecting one
//! is a pure lookup; user-defined profiles in the config file shadow these.

use crate::models::pane::PaneInfo;

/// Profile used when none is configured or selected.
pub const DEFAULT_PROFILE: &str = "minimal";

const REMOTE_HOST: &str = "user@remote.example.com";
const REMOTE_SSH: &str = "ssh -i ~/.ssh/agent_key user@remote.example.com";

/// Names of the built-in profiles, sorted.
#[must_use]
pub fn builtin_names() -> Vec<&'static str> {
    vec!["full", "minimal", "remote", "standard"]
}

/// Look up a built-in profile.
#[must_use]
pub fn builtin(name: &str) -> Option<Vec<PaneInfo>> {
    let panes = match name {
        "minimal" => vec![shell()],
        "standard" => vec![shell(), browser(), data(), docs()],
        "full" => vec![
            shell(),
            browser(),
            data(),
            docs(),
            email(),
            calendar(),
            tasks(),
            media(),
        ],
        "remote" => vec![shell(), remote_browser(), remote_files(), email()],
        _ => return None,
    };
    Some(panes)
}

fn shell() -> PaneInfo {
    PaneInfo::shell(
        "shell",
        "shell",
        "Local bash shell for filesystem ops, scripting, and general commands. \
         Working directory: /tmp/paneflow",
    )
}

fn browser() -> PaneInfo {
    PaneInfo::shell(
        "browser",
        "browser",
        "Web browsing pane. Use lynx -dump <url> for web pages, curl -s for APIs, \
         wget for downloads. Pipe through head/grep/sed to extract what you need.",
    )
}

fn data() -> PaneInfo {
    PaneInfo::shell(
        "data",
        "data",
        "Data processing pane. Use rg for search, mlr for CSV/JSON transforms, \
         jq for JSON, pandoc for document conversion, pdftotext for PDFs.",
    )
}

fn docs() -> PaneInfo {
    PaneInfo::shell(
        "docs",
        "docs",
        "Documentation and research pane. Use pandoc to convert formats, pdftotext \
         to read PDFs, lynx -dump for reference pages. Write results to /tmp/paneflow/.",
    )
}

fn email() -> PaneInfo {
    PaneInfo::shell(
        "email",
        "email_cli",
        "Email pane. Run bash fetch_emails.sh to load unread emails. Use neomutt for \
         interactive mail, or bash send_reply.sh <to> <subject> <body> to send.",
    )
}

fn calendar() -> PaneInfo {
    PaneInfo::shell(
        "calendar",
        "calendar_cli",
        "Calendar pane. Use icalBuddy eventsToday or icalBuddy eventsToday+7.",
    )
}

fn tasks() -> PaneInfo {
    PaneInfo::shell(
        "tasks",
        "tasks_cli",
        "Task management pane. Use taskwarrior: task list, task add <desc>, \
         task <id> done, task <id> modify.",
    )
}

fn media() -> PaneInfo {
    PaneInfo::shell(
        "media",
        "media",
        "Media processing pane. Helper scripts: bash tools/youtube.sh <cmd>, \
         bash tools/podcast.sh <cmd>, bash tools/claude.sh <prompt>. \
         Requires yt-dlp, whisper, curl, jq.",
    )
}

fn remote(name: &str, app_type: &str, description: &str) -> PaneInfo {
    let mut info = PaneInfo::shell(name, app_type, description);
    info.startup_command = Some(REMOTE_SSH.to_owned());
    info.host = Some(REMOTE_HOST.to_owned());
    info
}

fn remote_browser() -> PaneInfo {
    remote(
        "browser",
        "browser",
        "Restricted remote shell for web access. Commands: lynx -dump <url>, head, grep. \
         Write output to ~/files/ using >.",
    )
}

fn remote_files() -> PaneInfo {
    remote(
        "files",
        "files",
        "Remote filesystem. Write files to ~/files/ using shell redirects. \
         This is a remote shell; downloads must run from the local shell pane.",
    )
}
