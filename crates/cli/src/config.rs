use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use markup::MarkupSource;
use recurrence::RecurrenceConfig;
use serde::Deserialize;

pub const ENV_TOKEN: &str = "TELEGRAM_TOKEN";
pub const ENV_CHAT_ID: &str = "CHAT_ID";
pub const ENV_STORAGE_PATH: &str = "RANKWATCH_STORAGE_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_path: Option<PathBuf>,
    pub window_days: u32,
    pub min_count: usize,
    pub highlight_count: usize,
    pub busy_timeout_ms: u64,
    pub source: SourceConfig,
    pub telegram: TelegramConfig,
}

impl Default for Config {
    fn default() -> Self {
        let recurrence = RecurrenceConfig::default();
        Self {
            storage_path: None,
            window_days: recurrence.window_days,
            min_count: recurrence.min_count,
            highlight_count: recurrence.highlight_count,
            busy_timeout_ms: store_sqlite::DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            source: SourceConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub selectors: Vec<String>,
    pub max_name_len: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let source = MarkupSource::default();
        Self {
            url: source.url,
            selectors: source.selectors,
            max_name_len: source.max_name_len,
            timeout_secs: source.timeout.as_secs(),
            user_agent: source.user_agent,
        }
    }
}

impl SourceConfig {
    pub fn markup_source(&self) -> MarkupSource {
        MarkupSource {
            url: self.url.clone(),
            selectors: self.selectors.clone(),
            max_name_len: self.max_name_len,
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: Option<String>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramConfig {
    /// Token and chat id, when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.token.as_deref(), self.chat_id.as_deref()) {
            (Some(token), Some(chat_id)) => Some((token, chat_id)),
            _ => None,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rankwatch")
            .join("config.toml")
    }

    /// Reads the TOML file, then applies environment overrides. A missing
    /// default file is fine; a missing explicit `path` is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = get(ENV_TOKEN) {
            self.telegram.token = Some(token);
        }
        if let Some(chat_id) = get(ENV_CHAT_ID) {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(path) = get(ENV_STORAGE_PATH) {
            self.storage_path = Some(PathBuf::from(path));
        }
    }

    pub fn recurrence(&self) -> RecurrenceConfig {
        RecurrenceConfig {
            window_days: self.window_days,
            min_count: self.min_count,
            highlight_count: self.highlight_count,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
