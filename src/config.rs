use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::job::ChatTarget;
use crate::queue::RetryPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An environment variable holds a value of the wrong type.
    InvalidEnv { key: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidEnv { key, value } => {
                write!(f, "invalid value for {key}: '{value}'")
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidEnv { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Default destination: "@channelusername" or a numeric chat id
    telegram_chat_id: Option<String>,
    /// Alternate Bot API server (local bot-api, mock server)
    telegram_api_url: Option<String>,
    /// When set, jobs are POSTed here instead of going to Telegram
    relay_webhook_url: Option<String>,
    bind_address: Option<String>,
    port: Option<u16>,
    /// Clients must send this in `x-webhook-secret`
    webhook_secret: Option<String>,
    /// Clients may send this in `x-api-key` instead
    webhook_api_key: Option<String>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    max_backoff_secs: Option<u64>,
    rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    trust_proxy: bool,
    body_limit_bytes: Option<usize>,
    /// Operator chat that receives WARN/ERROR logs
    log_chat_id: Option<i64>,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
}

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_BODY_LIMIT: usize = 12 * 1024 * 1024;
const DEFAULT_RATE_LIMIT: u32 = 30;

/// Where jobs are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Telegram {
        bot_token: String,
        chat_id: ChatTarget,
        api_url: Option<reqwest::Url>,
    },
    Webhook { url: reqwest::Url },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub listen_addr: SocketAddr,
    pub webhook_secret: Option<String>,
    pub webhook_api_key: Option<String>,
    pub retry: RetryPolicy,
    pub rate_limit_per_minute: u32,
    /// Take the client IP from `X-Forwarded-For`.
    pub trust_proxy: bool,
    pub body_limit_bytes: usize,
    pub log_chat_id: Option<i64>,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path, source: e })?;
        Self::from_file(file)
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup using the environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let file = ConfigFile {
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            telegram_api_url: get("TELEGRAM_API_URL"),
            relay_webhook_url: get("RELAY_WEBHOOK_URL"),
            bind_address: get("BIND_ADDRESS"),
            port: parse_env("PORT", get("PORT"))?,
            webhook_secret: get("WEBHOOK_SECRET"),
            webhook_api_key: get("WEBHOOK_API_KEY"),
            max_attempts: parse_env("PUBLISH_MAX_ATTEMPTS", get("PUBLISH_MAX_ATTEMPTS"))?,
            backoff_base_ms: parse_env("PUBLISH_BACKOFF_BASE_MS", get("PUBLISH_BACKOFF_BASE_MS"))?,
            max_backoff_secs: parse_env("PUBLISH_MAX_BACKOFF_SECS", get("PUBLISH_MAX_BACKOFF_SECS"))?,
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", get("RATE_LIMIT_PER_MINUTE"))?,
            trust_proxy: parse_env("TRUST_PROXY", get("TRUST_PROXY"))?.unwrap_or(false),
            body_limit_bytes: parse_env("BODY_LIMIT_BYTES", get("BODY_LIMIT_BYTES"))?,
            log_chat_id: parse_env("LOG_CHAT_ID", get("LOG_CHAT_ID"))?,
            data_dir: get("DATA_DIR"),
        };
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let target = match file.relay_webhook_url {
            Some(url) => Target::Webhook { url: parse_url("relay_webhook_url", &url)? },
            None => {
                validate_token(&file.telegram_bot_token)?;
                let chat = file.telegram_chat_id.ok_or_else(|| {
                    ConfigError::Validation("telegram_chat_id is required".into())
                })?;
                let chat_id = ChatTarget::parse(&chat)
                    .map_err(|_| ConfigError::Validation(format!("telegram_chat_id '{chat}' is not a chat id or @username")))?;
                let api_url = file
                    .telegram_api_url
                    .map(|u| parse_url("telegram_api_url", &u))
                    .transpose()?;
                Target::Telegram { bot_token: file.telegram_bot_token, chat_id, api_url }
            }
        };

        let bind = file.bind_address.unwrap_or_else(|| "0.0.0.0".to_string());
        let port = file.port.unwrap_or(DEFAULT_PORT);
        let listen_addr: SocketAddr = format!("{bind}:{port}")
            .parse()
            .map_err(|_| ConfigError::Validation(format!("bind_address '{bind}' is not an IP address")))?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: file.backoff_base_ms.map(Duration::from_millis).unwrap_or(defaults.base_delay),
            max_delay: file.max_backoff_secs.map(Duration::from_secs).unwrap_or(defaults.max_delay),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Validation("max_attempts must be at least 1".into()));
        }

        let rate_limit_per_minute = file.rate_limit_per_minute.unwrap_or(DEFAULT_RATE_LIMIT);
        if rate_limit_per_minute == 0 {
            return Err(ConfigError::Validation("rate_limit_per_minute must be at least 1".into()));
        }

        Ok(Self {
            target,
            listen_addr,
            webhook_secret: file.webhook_secret.filter(|s| !s.is_empty()),
            webhook_api_key: file.webhook_api_key.filter(|s| !s.is_empty()),
            retry,
            rate_limit_per_minute,
            trust_proxy: file.trust_proxy,
            body_limit_bytes: file.body_limit_bytes.unwrap_or(DEFAULT_BODY_LIMIT),
            log_chat_id: file.log_chat_id,
            data_dir: file.data_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    pub fn auth_configured(&self) -> bool {
        self.webhook_secret.is_some() || self.webhook_api_key.is_some()
    }
}

fn validate_token(token: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation("telegram_bot_token is required".into()));
    }
    // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
    let token_parts: Vec<&str> = token.split(':').collect();
    if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
        return Err(ConfigError::Validation(
            "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
        ));
    }
    Ok(())
}

fn parse_url(field: &str, value: &str) -> Result<reqwest::Url, ConfigError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| ConfigError::Validation(format!("{field} '{value}' is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!("{field} must be http or https")));
    }
    Ok(url)
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.parse::<T>().map_err(|_| ConfigError::InvalidEnv { key, value: v }))
        .transpose()
}
