//! Command line arguments and logger construction.

use crate::github::DEFAULT_API_URL;
use crate::logging::{ConsoleSink, FileSink, LevelFilter, Logger, SeverityRouter, Sink, SinkError};
use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Expose local webhook endpoints through a tunnel and keep a GitHub
/// repository's hooks pointed at them.
#[derive(Parser, Debug)]
#[command(name = "hookrelay")]
#[command(version)]
pub struct Args {
    /// Endpoint spec file (JSON)
    #[arg(short, long, default_value = "demos/basic.json")]
    pub spec: PathBuf,

    /// Repository whose hooks are managed, as owner/repo
    #[arg(short, long, env = "GITHUB_REPOSITORY")]
    pub repo: RepoSlug,

    /// GitHub token with admin:repo_hook scope
    #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Local port for the route server
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Delete every existing hook instead of only the stale ones
    #[arg(long)]
    pub clear: bool,

    /// Log threshold: error, warning, notice, info, debug, all (or 0-5)
    #[arg(short, long, default_value = "all")]
    pub log_level: LevelFilter,

    /// Also write application logs to this file
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// Write request payload dumps to this file
    #[arg(long)]
    pub hookfile: Option<PathBuf>,

    /// Keep application logs off stdout
    #[arg(long)]
    pub suppress_console_logs: bool,

    /// Keep payload dumps off stdout
    #[arg(long)]
    pub suppress_console_hooks: bool,

    /// Keep everything off stdout
    #[arg(long)]
    pub suppress_console: bool,

    /// Use this public base url instead of starting ngrok
    #[arg(long, env = "HOOKRELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Stable tunnel domain used to recognise stale hooks
    /// (default: public host minus its first label)
    #[arg(long)]
    pub tunnel_domain: Option<String>,

    /// Match stale hooks on host and exact first path segment
    #[arg(long)]
    pub strict_match: bool,

    /// GitHub API base url
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// ngrok executable
    #[arg(long, default_value = "ngrok")]
    pub ngrok_bin: String,

    /// GitHub request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl Args {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Application logger: console and/or `--logfile`, at `--log-level`.
    pub fn app_logger(&self) -> Result<Logger, SinkError> {
        let console = !(self.suppress_console || self.suppress_console_logs);
        build_logger(console, self.logfile.as_ref(), self.log_level)
    }

    /// Payload logger: request dumps at info, console and/or `--hookfile`.
    pub fn payload_logger(&self) -> Result<Logger, SinkError> {
        let console = !(self.suppress_console || self.suppress_console_hooks);
        build_logger(console, self.hookfile.as_ref(), LevelFilter::Info)
    }
}

fn build_logger(console: bool, file: Option<&PathBuf>, threshold: LevelFilter) -> Result<Logger, SinkError> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    if console {
        sinks.push(Arc::new(ConsoleSink::new(threshold)));
    }
    if let Some(path) = file {
        sinks.push(Arc::new(FileSink::new(path, threshold)?));
    }
    Ok(Arc::new(SeverityRouter::new(sinks)))
}

/// `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl FromStr for RepoSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        match s.split_once('/') {
            Some((owner, repo)) if valid(owner) && valid(repo) => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(format!("expected owner/repo, got '{s}'")),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
