//! Configuration loader and validator for the lead alert service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::notify::NotifySettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub notifications: Notifications,
    pub mail: Mail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Public site root used for lead deep links.
    pub site_url: String,
}

/// New-lead notification tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notifications {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub window_seconds: u64,
    pub fetch_multiplier: usize,
    pub max_fetch: usize,
}

/// Email provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    pub api_key: String,
    pub from: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl App {
    /// Expand a leading `~/` using `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` wins over the SQLite file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/leads.db", self.app.resolved_data_dir()))
    }

    pub fn notify_settings(&self) -> NotifySettings {
        NotifySettings {
            window: chrono::Duration::seconds(
                self.notifications.window_seconds.min(MAX_WINDOW_SECONDS) as i64,
            ),
            fetch_multiplier: self.notifications.fetch_multiplier,
            max_fetch: self.notifications.max_fetch,
            site_url: self.app.site_url.clone(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Longest accepted `notifications.window_seconds` (one day).
pub const MAX_WINDOW_SECONDS: u64 = 86_400;

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    let site = cfg.app.site_url.trim();
    if !(site.starts_with("http://") || site.starts_with("https://")) {
        return Err(ConfigError::Invalid("app.site_url must be an http(s) URL"));
    }

    let n = &cfg.notifications;
    if n.window_seconds == 0 {
        return Err(ConfigError::Invalid("notifications.window_seconds must be > 0"));
    }
    if n.window_seconds > MAX_WINDOW_SECONDS {
        return Err(ConfigError::Invalid("notifications.window_seconds must be <= 86400"));
    }
    if n.fetch_multiplier == 0 {
        return Err(ConfigError::Invalid("notifications.fetch_multiplier must be > 0"));
    }
    if n.max_fetch == 0 {
        return Err(ConfigError::Invalid("notifications.max_fetch must be > 0"));
    }

    if cfg.mail.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.api_key must be non-empty"));
    }
    if cfg.mail.from.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.from must be non-empty"));
    }
    Ok(())
}

/// Reference configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  site_url: "https://leads.example.com"

notifications:
  enabled: true
  window_seconds: 15
  fetch_multiplier: 2
  max_fetch: 500

mail:
  api_key: "YOUR_RESEND_API_KEY"
  from: "Lead Alerts <alerts@leads.example.com>"
"#
}
