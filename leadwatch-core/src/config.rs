//! Application configuration.
//!
//! Settings are read from an optional TOML file, then credentials and a few
//! paths are overridden from the environment. Every section falls back to
//! defaults tuned for a math-tutoring lead search, so an empty file (or no
//! file at all) is a valid configuration once credentials are present.

use crate::error::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "leadwatch.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://leadwatch.db";

const ENV_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
const ENV_USER_AGENT: &str = "REDDIT_USER_AGENT";
const ENV_DATABASE_URL: &str = "LEADWATCH_DATABASE_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reddit: RedditConfig,
    pub subreddits: Vec<String>,
    pub filter: FilterConfig,
    pub polling: PollingConfig,
    pub rate_limit: RateLimitSettings,
    pub notifications: NotificationConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub api_base_url: String,
    pub auth_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: format!("leadwatch/{}", env!("CARGO_PKG_VERSION")),
            api_base_url: "https://oauth.reddit.com".to_string(),
            auth_base_url: "https://www.reddit.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl RedditConfig {
    /// Client id and secret, or the first one that is missing.
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let client_id = non_empty(&self.client_id).ok_or_else(|| ConfigError::MissingField {
            field: format!("reddit.client_id (or {})", ENV_CLIENT_ID),
        })?;
        let client_secret =
            non_empty(&self.client_secret).ok_or_else(|| ConfigError::MissingField {
                field: format!("reddit.client_secret (or {})", ENV_CLIENT_SECRET),
            })?;
        Ok((client_id, client_secret))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeKeywords {
    pub elementary: Vec<String>,
    pub middle: Vec<String>,
    pub high: Vec<String>,
}

impl Default for GradeKeywords {
    fn default() -> Self {
        Self {
            elementary: strings(&[
                "year 2",
                "year 3",
                "year 4",
                "year 5",
                "year 6",
                "primary",
                "elementary",
                "grade 2",
                "grade 3",
                "grade 4",
                "grade 5",
            ]),
            middle: strings(&[
                "year 7",
                "year 8",
                "year 9",
                "middle school",
                "gcse",
                "grade 6",
                "grade 7",
                "grade 8",
            ]),
            high: strings(&[
                "year 10",
                "year 11",
                "year 12",
                "year 13",
                "a-level",
                "a level",
                "high school",
                "igcse",
                "ib",
                "grade 9",
                "grade 10",
                "grade 11",
                "grade 12",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub keywords: Vec<String>,
    pub grade_keywords: GradeKeywords,
    pub urgency_keywords: Vec<String>,
    pub parent_keywords: Vec<String>,
    pub payment_keywords: Vec<String>,
    pub max_age_hours: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            keywords: strings(&[
                "math tutor",
                "mathematics tutor",
                "maths help",
                "need math help",
                "looking for tutor",
                "algebra help",
                "calculus tutor",
                "geometry tutor",
                "statistics help",
                "maths teacher",
                "online tutor",
            ]),
            grade_keywords: GradeKeywords::default(),
            urgency_keywords: strings(&[
                "urgent",
                "asap",
                "exam tomorrow",
                "test tomorrow",
                "due tomorrow",
                "help now",
                "need help now",
            ]),
            parent_keywords: strings(&[
                "my son",
                "my daughter",
                "my child",
                "my kid",
                "my children",
            ]),
            payment_keywords: strings(&[
                "pay", "rate", "price", "cost", "budget", "hourly", "per hour",
            ]),
            max_age_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_minutes: u64,
    pub posts_per_subreddit: u32,
    pub subreddit_delay_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            posts_per_subreddit: 50,
            subreddit_delay_secs: 2,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn subreddit_delay(&self) -> Duration {
        Duration::from_secs(self.subreddit_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests_per_minute: u32,
    pub burst_allowance: u32,
    pub max_retries: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            // Reddit allows 100 OAuth requests per minute; stay well under it
            max_requests_per_minute: 60,
            burst_allowance: 5,
            max_retries: 3,
            failure_threshold: 3,
            recovery_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Desktop,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub backend: NotifierKind,
    pub max_per_cycle: u32,
    pub max_per_day: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            backend: NotifierKind::Desktop,
            max_per_cycle: 5,
            max_per_day: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_subreddits() -> Vec<String> {
    strings(&[
        "tutoring",
        "HomeworkHelp",
        "learnmath",
        "askmath",
        "MathHelp",
        "APStudents",
        "GCSE",
        "6thForm",
        "igcse",
        "IBO",
    ])
}

impl AppConfig {
    /// Load configuration from `path`, or from `leadwatch.toml` in the
    /// working directory when no path is given, then apply environment
    /// overrides and validate.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Self::from_file(path)?
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default_with_subreddits()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(Self::from_toml_str(&raw)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(raw)?;
        if config.subreddits.is_empty() && !raw.contains("subreddits") {
            config.subreddits = default_subreddits();
        }
        Ok(config)
    }

    pub fn default_with_subreddits() -> Self {
        Self {
            subreddits: default_subreddits(),
            ..Self::default()
        }
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.reddit.client_id = Some(client_id);
        }
        if let Some(client_secret) = lookup(ENV_CLIENT_SECRET) {
            self.reddit.client_secret = Some(client_secret);
        }
        if let Some(user_agent) = lookup(ENV_USER_AGENT).filter(|v| !v.trim().is_empty()) {
            self.reddit.user_agent = user_agent;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.database.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddits.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "at least one subreddit must be configured".to_string(),
            });
        }
        if let Some(bad) = self
            .subreddits
            .iter()
            .find(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::InvalidValue {
                field: "subreddits".to_string(),
                value: bad.clone(),
            });
        }
        if self.filter.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed {
                reason: "at least one search keyword must be configured".to_string(),
            });
        }
        if self.polling.interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.interval_minutes".to_string(),
                value: "0".to_string(),
            });
        }
        if self.polling.posts_per_subreddit == 0 || self.polling.posts_per_subreddit > 100 {
            return Err(ConfigError::InvalidValue {
                field: "polling.posts_per_subreddit".to_string(),
                value: self.polling.posts_per_subreddit.to_string(),
            });
        }
        if self.rate_limit.max_requests_per_minute == 0 || self.rate_limit.burst_allowance == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "rate_limit.max_requests_per_minute and rate_limit.burst_allowance must be positive"
                    .to_string(),
            });
        }
        if self.rate_limit.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.max_retries".to_string(),
                value: "0".to_string(),
            });
        }
        if self.reddit.user_agent.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "reddit.user_agent".to_string(),
            });
        }
        Ok(())
    }
}
