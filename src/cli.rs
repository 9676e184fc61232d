///
/// This module implements the CLI interface for diff-preview-comment: command parsing,
/// argument validation and the async entrypoint shared by `main` and the tests.
///
/// Splitting, retrying and ordering of comments live in the
/// [`diff-preview-comment-core`] crate. This module only wires flags, files and
/// environment into it.
///
/// ## How To Use
/// - From a shell: `diff-preview-comment add -f diff.md -p owner/repo#123`
/// - Programmatically: build a [`Cli`] and call [`run`].
///
/// [`diff-preview-comment-core`]: ../../diff-preview-comment-core/
use crate::github::GitHubClient;
use crate::load_config::{load_config, resolve_settings, resolve_token, Overrides};
use crate::pr_ref::parse_pr_ref;
use crate::version;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use diff_preview_comment_core::{publish, DeliveryClient, TokioClock};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// CLI for diff-preview-comment: post Argo CD diff previews to pull requests.
#[derive(Debug, Parser)]
#[clap(
    name = "diff-preview-comment",
    version,
    about = version::DESCRIPTION,
    long_about = "Processes Argo CD application diffs rendered by argocd-diff-preview and posts them \
as comments on GitHub pull requests, split into several comments when they exceed the size limit."
)]
pub struct Cli {
    /// Set the logging level
    #[clap(
        long,
        global = true,
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// Same verbosity as `error`
    Fatal,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Post an Argo CD diff to a GitHub PR as one or more comments
    Add(AddArgs),

    /// Print version information
    Version,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Path to the diff markdown file
    #[clap(short = 'f', long)]
    pub file: PathBuf,

    /// Pull request reference (owner/repo#123 or a PR URL)
    #[clap(short = 'p', long)]
    pub pr: String,

    /// GitHub token (falls back to GH_TOKEN, then GITHUB_TOKEN)
    #[clap(short = 't', long)]
    pub github_token: Option<String>,

    /// Maximum length in bytes for a single comment [default: 65536]
    #[clap(short = 'm', long)]
    pub max_length: Option<usize>,

    /// Maximum number of retries for a failed post [default: 3]
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Initial delay between retries, e.g. 500ms or 2s [default: 2s]
    #[clap(long, value_parser = crate::load_config::parse_duration)]
    pub retry_delay: Option<Duration>,

    /// Backoff multiplier for retries [default: 2.0]
    #[clap(long)]
    pub backoff_factor: Option<f64>,

    /// HTTP request timeout [default: 30s]
    #[clap(long, value_parser = crate::load_config::parse_duration)]
    pub request_timeout: Option<Duration>,

    /// GitHub API base URL
    #[clap(long, env = "GITHUB_API_URL")]
    pub api_url: Option<String>,

    /// YAML file with defaults for the settings above
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Show what would be posted without posting anything
    #[clap(long)]
    pub dry_run: bool,
}

impl AddArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            max_length: self.max_length,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            backoff_factor: self.backoff_factor,
            request_timeout: self.request_timeout,
            api_url: self.api_url.clone(),
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    debug!(version = %version::full_version(), "Starting diff-preview-comment");

    match cli.command {
        Commands::Add(args) => add(args).await,
        Commands::Version => {
            println!("{}", version::info());
            Ok(())
        }
    }
}

async fn add(args: AddArgs) -> Result<()> {
    // Configuration errors surface before the input file is touched.
    let token = if args.dry_run {
        resolve_token(args.github_token.as_deref()).ok()
    } else {
        Some(resolve_token(args.github_token.as_deref())?)
    };
    let destination = parse_pr_ref(&args.pr).context("invalid PR reference")?;
    let file_config = args.config.as_deref().map(load_config).transpose()?;
    let settings = resolve_settings(&args.overrides(), file_config.as_ref())?;

    info!(pr = %destination, "Target PR");
    info!(file = ?args.file, max_length = settings.max_length, "Processing diff file");
    if args.dry_run {
        info!("DRY RUN MODE - No comments will be posted");
    }

    let document = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read input file {:?}", args.file))?;
    info!(size = document.len(), "Input file size");

    let transport = GitHubClient::new(
        settings.api_url.clone(),
        token,
        settings.policy.request_timeout,
    )
    .context("failed to build GitHub client")?;
    let client = DeliveryClient::new(transport, TokioClock, settings.policy, args.dry_run);

    let report = publish(
        &document,
        &destination,
        settings.max_length,
        &client,
        &TokioClock,
    )
    .await?;
    debug!(?report, "Publish report");

    if report.dry_run {
        info!(parts = report.total_parts, "DRY RUN completed - No comments were posted");
    } else {
        info!(parts = report.total_parts, "Successfully posted all comments to PR");
    }
    Ok(())
}
