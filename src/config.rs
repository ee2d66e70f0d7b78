//! Configuration for draftline, read from `draftline.toml`.
//!
//! Every field has a default, so an empty or missing file is valid. Secrets
//! never live in the file: provider keys come from the environment
//! (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`), which `main` populates from a
//! `.env` file via dotenvy.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [database]
//! path = ".draftline/draftline.db"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! step_timeout_secs = 300
//!
//! [fanout]
//! max_parallel = 0
//!
//! [ai]
//! provider = "http"
//! anthropic_base_url = "https://api.anthropic.com/v1/messages"
//! openai_base_url = "https://api.openai.com/v1/chat/completions"
//! request_timeout_secs = 120
//!
//! [notify]
//! enabled = false
//! app_url = "http://localhost:3000"
//! frontend_url = "http://localhost:3000"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ai::http::{ANTHROPIC_API_URL, OPENAI_API_URL};
use crate::engine::RetryPolicy;
use crate::pipeline::PipelineSettings;

pub const CONFIG_FILE: &str = "draftline.toml";
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ── Sections ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".draftline/draftline.db")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Attempts per step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_step_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutSection {
    /// Maximum concurrent items per fan-out; 0 means no limit.
    #[serde(default)]
    pub max_parallel: usize,
}

/// Which language-model backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic + OpenAI over HTTP.
    #[default]
    Http,
    /// Deterministic local answers; no network and no keys.
    Offline,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Http => "http",
            ProviderKind::Offline => "offline",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProviderKind::Http),
            "offline" => Ok(ProviderKind::Offline),
            _ => Err(format!("Invalid provider: {} (expected http or offline)", s)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            anthropic_base_url: default_anthropic_url(),
            openai_base_url: default_openai_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_anthropic_url() -> String {
    ANTHROPIC_API_URL.to_string()
}

fn default_openai_url() -> String {
    OPENAI_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifySection {
    /// When false, completion emails are logged instead of sent.
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the application that delivers the email.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Base URL used for the article link inside the email.
    #[serde(default = "default_app_url")]
    pub frontend_url: String,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            enabled: false,
            app_url: default_app_url(),
            frontend_url: default_app_url(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Top level ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftlineToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub fanout: FanoutSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DraftlineToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse draftline.toml")
    }

    /// Load `draftline.toml` from `dir`, or defaults if it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize draftline.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve the database path against the directory the config lives in.
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            base_dir.join(&self.database.path)
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            frontend_url: self.notify.frontend_url.clone(),
            max_parallel: self.fanout.max_parallel,
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; it will be treated as 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.retry.step_timeout_secs == 0 {
            warnings.push("retry.step_timeout_secs is 0; every attempt will time out".to_string());
        }

        if self.ai.provider == ProviderKind::Http {
            for (name, url) in [
                ("ai.anthropic_base_url", &self.ai.anthropic_base_url),
                ("ai.openai_base_url", &self.ai.openai_base_url),
            ] {
                if !is_http_url(url) {
                    warnings.push(format!("Invalid {} '{}': must start with http:// or https://", name, url));
                }
            }
        }

        if self.notify.enabled && !is_http_url(&self.notify.app_url) {
            warnings.push(format!(
                "Invalid notify.app_url '{}': must start with http:// or https://",
                self.notify.app_url
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Invalid logging.level '{}': expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        warnings
    }

    /// Environment variables the configured provider needs but that are
    /// not set.
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        if self.ai.provider == ProviderKind::Offline {
            return Vec::new();
        }
        [ANTHROPIC_KEY_ENV, OPENAI_KEY_ENV]
            .into_iter()
            .filter(|var| std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true))
            .collect()
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
