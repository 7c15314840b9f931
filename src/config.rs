use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::render::{DEFAULT_BLOCK_CHAR_BUDGET, OutputFormat};
use crate::report::{CategoryRules, DEFAULT_EXCLUDED_STATES, DEFAULT_RECENT_DAYS};
use crate::sources::MAX_PAGE_SIZE;
use crate::sources::linear;
use crate::summarize::DEFAULT_MODEL;

pub const DEFAULT_CONFIG_PATH: &str = "linear-digest.toml";
pub const DEFAULT_PAGE_SIZE: u32 = 200;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_RECENT_DAYS: i64 = 3650;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub teams: Option<Vec<String>>,
    pub page_size: Option<u32>,
    pub recent_days: Option<i64>,
    pub excluded_states: Option<Vec<String>>,
    pub include_unmatched: Option<bool>,
    pub format: Option<String>,
    pub block_char_budget: Option<usize>,
    pub per_assignee: Option<bool>,
    pub summarize: Option<bool>,
    pub model: Option<String>,
    pub prompt_dir: Option<String>,
    pub cycle_team_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub linear_api_key_env: Option<String>,
    pub openai_api_key_env: Option<String>,
    pub webhook_url_env: Option<String>,
}

impl ConfigFile {
    fn linear_api_key_env(&self) -> &str {
        self.linear_api_key_env.as_deref().unwrap_or("LINEAR_API_KEY")
    }

    fn openai_api_key_env(&self) -> &str {
        self.openai_api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
    }

    fn webhook_url_env(&self) -> &str {
        self.webhook_url_env.as_deref().unwrap_or("SLACK_WEBHOOK_URL")
    }
}

/// A credential or endpoint that must not show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Credentials and endpoints resolved from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Secrets {
    pub linear_api_key: Secret,
    pub openai_api_key: Option<Secret>,
    pub webhook_url: Option<Secret>,
}

impl Secrets {
    pub fn from_env(file: &ConfigFile) -> Result<Self> {
        Ok(Self {
            linear_api_key: Secret::new(linear::resolve_api_key(file.linear_api_key_env())?),
            openai_api_key: env_secret(file.openai_api_key_env()),
            webhook_url: env_secret(file.webhook_url_env()),
        })
    }
}

fn env_secret(name: &str) -> Option<Secret> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub linear_api_key: Secret,
    pub openai_api_key: Option<Secret>,
    pub webhook_url: Option<Secret>,
    pub team_filter: Vec<String>,
    pub page_size: u32,
    pub recent_days: i64,
    pub excluded_states: Vec<String>,
    pub include_unmatched: bool,
    pub format: OutputFormat,
    pub block_char_budget: usize,
    pub per_assignee: bool,
    pub summarize: bool,
    pub model: String,
    pub prompt_dir: Option<String>,
    pub cycle_team_id: Option<String>,
    pub request_timeout: Duration,
    pub dry_run: bool,
    pub now: Option<DateTime<Utc>>,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config.as_deref() {
            Some(path) => {
                let path = Path::new(path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let secrets = Secrets::from_env(&file_config)?;
        merge(file_config, cli, secrets)
    }

    pub fn category_rules(&self) -> CategoryRules {
        CategoryRules::new(
            self.recent_days,
            &self.excluded_states,
            self.include_unmatched,
        )
    }

    /// Summaries need both the flag and a credential.
    pub fn summarizer_key(&self) -> Option<&Secret> {
        if self.summarize {
            self.openai_api_key.as_ref()
        } else {
            None
        }
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref format) = config.format {
        parse_format(format)?;
    }
    if let Some(page_size) = config.page_size
        && !(1..=MAX_PAGE_SIZE).contains(&page_size)
    {
        return Err(Error::ConfigValidation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    if let Some(days) = config.recent_days
        && !(1..=MAX_RECENT_DAYS).contains(&days)
    {
        return Err(Error::ConfigValidation(format!(
            "recent_days must be between 1 and {MAX_RECENT_DAYS}"
        )));
    }
    if config.block_char_budget == Some(0) {
        return Err(Error::ConfigValidation(
            "block_char_budget must be > 0".to_string(),
        ));
    }
    if config.request_timeout_secs == Some(0) {
        return Err(Error::ConfigValidation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }
    if let Some(ref model) = config.model
        && model.trim().is_empty()
    {
        return Err(Error::ConfigValidation("model must not be empty".to_string()));
    }
    Ok(())
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).ok_or_else(|| {
        Error::ConfigValidation(format!("unknown format: {value} (expected: text, blocks)"))
    })
}

fn parse_now(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::ConfigValidation(format!("invalid --now '{value}': {e}")))
}

pub fn merge(file: ConfigFile, cli: &Cli, secrets: Secrets) -> Result<Config> {
    let format = match cli.format.as_deref().or(file.format.as_deref()) {
        Some(value) => parse_format(value)?,
        None => OutputFormat::default(),
    };
    let now = cli.now.as_deref().map(parse_now).transpose()?;

    Ok(Config {
        linear_api_key: secrets.linear_api_key,
        openai_api_key: secrets.openai_api_key,
        webhook_url: secrets.webhook_url,
        team_filter: if cli.teams.is_empty() {
            file.teams.unwrap_or_default()
        } else {
            cli.teams.clone()
        },
        page_size: file.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        recent_days: file.recent_days.unwrap_or(DEFAULT_RECENT_DAYS),
        excluded_states: file.excluded_states.unwrap_or_else(|| {
            DEFAULT_EXCLUDED_STATES
                .iter()
                .map(|s| s.to_string())
                .collect()
        }),
        include_unmatched: file.include_unmatched.unwrap_or(false),
        format,
        block_char_budget: file.block_char_budget.unwrap_or(DEFAULT_BLOCK_CHAR_BUDGET),
        per_assignee: !cli.combined && file.per_assignee.unwrap_or(true),
        summarize: !cli.no_summary && file.summarize.unwrap_or(true),
        model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        prompt_dir: file.prompt_dir,
        cycle_team_id: file.cycle_team_id,
        request_timeout: Duration::from_secs(
            file.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
        dry_run: cli.dry_run,
        now,
    })
}
