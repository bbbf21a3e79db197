//! Configuration loader and validator for the flair-enforcement bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

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
    pub reddit: Reddit,
    pub moderation: Moderation,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub scan_interval_seconds: u64,
    pub max_backoff_seconds: u64,
}

/// Reddit script-app credentials and the community to watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reddit {
    pub user_agent: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub subreddit: String,
}

/// Flair-enforcement timing and rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Moderation {
    pub reminder_after_seconds: u64,
    pub remove_after_seconds: u64,
    pub tech_support_flair: String,
    pub post_grab_limit: u32,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
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

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.scan_interval_seconds == 0 {
        return Err(ConfigError::Invalid("app.scan_interval_seconds must be > 0"));
    }

    if cfg.reddit.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.user_agent must be non-empty"));
    }
    if cfg.reddit.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.client_id must be non-empty"));
    }
    if cfg.reddit.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.client_secret must be non-empty"));
    }
    if cfg.reddit.username.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.username must be non-empty"));
    }
    if cfg.reddit.password.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.password must be non-empty"));
    }
    if cfg.reddit.subreddit.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.subreddit must be non-empty"));
    }

    if cfg.moderation.reminder_after_seconds == 0 {
        return Err(ConfigError::Invalid("moderation.reminder_after_seconds must be > 0"));
    }
    if cfg.moderation.remove_after_seconds == 0 {
        return Err(ConfigError::Invalid("moderation.remove_after_seconds must be > 0"));
    }
    if cfg.moderation.tech_support_flair.trim().is_empty() {
        return Err(ConfigError::Invalid("moderation.tech_support_flair must be non-empty"));
    }
    if cfg.moderation.post_grab_limit == 0 || cfg.moderation.post_grab_limit > 100 {
        return Err(ConfigError::Invalid("moderation.post_grab_limit must be in 1..=100"));
    }

    Ok(())
}

/// Example configuration used by tests and as a starting point for deployments.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  scan_interval_seconds: 10
  max_backoff_seconds: 600

reddit:
  user_agent: "/r/AMD flair bot by /u/YOUR_USERNAME"
  client_id: "YOUR_REDDIT_CLIENT_ID"
  client_secret: "YOUR_REDDIT_CLIENT_SECRET"
  username: "YOUR_BOT_USERNAME"
  password: "YOUR_BOT_PASSWORD"
  subreddit: "amd"

moderation:
  reminder_after_seconds: 60
  remove_after_seconds: 1200
  tech_support_flair: "Tech Support"
  post_grab_limit: 100
"#
}
