//! `load_config` module: turns flags, an optional YAML file and the environment into
//! the settings the `add` command runs with.
//!
//! # Precedence
//! For every delivery setting: explicit flag, then the `--config` file, then the
//! built-in default. The token never comes from the file, only from the flag or
//! the `GH_TOKEN` / `GITHUB_TOKEN` environment variables.
//!
//! # File format
//! ```yaml
//! max_length: 65536
//! max_retries: 5
//! retry_delay: 1s
//! backoff_factor: 1.5
//! request_timeout: 1m
//! api_url: https://github.example.com/api/v3
//! ```
//! Every key is optional.

use diff_preview_comment_core::{DeliveryPolicy, DEFAULT_MAX_COMMENT_LENGTH};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Environment variables consulted for the token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["GH_TOKEN", "GITHUB_TOKEN"];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("GitHub token is required: use --github-token or set the GH_TOKEN or GITHUB_TOKEN environment variable")]
    MissingToken,

    #[error("invalid duration {0:?}: expected a value like 500ms, 2s or 1m30s")]
    InvalidDuration(String),

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Settings read from a `--config` file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub max_length: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<String>,
    pub backoff_factor: Option<f64>,
    pub request_timeout: Option<String>,
    pub api_url: Option<String>,
}

/// Values given explicitly on the command line.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Overrides {
    pub max_length: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub backoff_factor: Option<f64>,
    pub request_timeout: Option<Duration>,
    pub api_url: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub max_length: usize,
    pub policy: DeliveryPolicy,
    pub api_url: String,
}

/// Loads a YAML settings file.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<FileConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // An empty file is a valid config with nothing set.
    if config_content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    match serde_yaml::from_str::<FileConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Merges command line overrides over the file over the defaults, and validates the result.
pub fn resolve_settings(
    overrides: &Overrides,
    file: Option<&FileConfig>,
) -> Result<Settings, ConfigError> {
    let file = file.cloned().unwrap_or_default();
    let defaults = DeliveryPolicy::DEFAULT;

    let retry_delay = match (overrides.retry_delay, file.retry_delay.as_deref()) {
        (Some(d), _) => d,
        (None, Some(raw)) => parse_duration(raw)?,
        (None, None) => defaults.initial_delay,
    };
    let request_timeout = match (overrides.request_timeout, file.request_timeout.as_deref()) {
        (Some(d), _) => d,
        (None, Some(raw)) => parse_duration(raw)?,
        (None, None) => defaults.request_timeout,
    };

    let settings = Settings {
        max_length: overrides
            .max_length
            .or(file.max_length)
            .unwrap_or(DEFAULT_MAX_COMMENT_LENGTH),
        policy: DeliveryPolicy {
            max_retries: overrides
                .max_retries
                .or(file.max_retries)
                .unwrap_or(defaults.max_retries),
            initial_delay: retry_delay,
            backoff_factor: overrides
                .backoff_factor
                .or(file.backoff_factor)
                .unwrap_or(defaults.backoff_factor),
            request_timeout,
        },
        api_url: overrides
            .api_url
            .clone()
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
    };

    if settings.max_length == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max length",
            reason: "must be greater than zero".to_string(),
        });
    }
    let factor = settings.policy.backoff_factor;
    if !factor.is_finite() || factor < 1.0 {
        return Err(ConfigError::InvalidValue {
            field: "backoff factor",
            reason: format!("must be a number of at least 1, got {factor}"),
        });
    }

    debug!(?settings, "Resolved settings");
    Ok(settings)
}

/// Returns the GitHub token from the flag, or the first non-empty variable in
/// [`TOKEN_ENV_VARS`].
pub fn resolve_token(flag: Option<&str>) -> Result<String, ConfigError> {
    if let Some(token) = flag.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    for name in TOKEN_ENV_VARS {
        if let Ok(token) = env::var(name) {
            if !token.is_empty() {
                debug!(source = name, "Using GitHub token from environment");
                return Ok(token);
            }
        }
    }
    Err(ConfigError::MissingToken)
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)").expect("valid duration regex")
    })
}

/// Parses durations such as `500ms`, `2s`, `1.5s` or `1m30s`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_string());
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err(invalid());
    }

    let mut consumed = 0;
    let mut total_nanos = 0f64;
    for caps in duration_regex().captures_iter(value) {
        let whole = caps.get(0).ok_or_else(invalid)?;
        if whole.start() != consumed {
            return Err(invalid());
        }
        consumed = whole.end();

        let amount: f64 = caps[1].parse().map_err(|_| invalid())?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total_nanos += amount * unit_nanos;
    }
    if consumed != value.len() || total_nanos >= u64::MAX as f64 {
        return Err(invalid());
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
