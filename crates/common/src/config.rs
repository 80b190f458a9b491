//! Application configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Offline notifications are only queued when set.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Chat engine policy.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Transaction service integration.
    #[serde(default)]
    pub transactions: TransactionsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Chat engine policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// How long after creation a text message may still be edited.
    #[serde(default = "default_edit_window_secs")]
    pub edit_window_secs: u64,
    /// Quiet period after which a typing indicator clears itself.
    #[serde(default = "default_typing_timeout_secs")]
    pub typing_timeout_secs: u64,
    /// Upper bound for a single offline notification hand-off.
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    /// Page size used when the client does not ask for one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    /// Largest page size a client may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl ChatConfig {
    /// Edit window as a [`chrono::Duration`].
    #[must_use]
    pub fn edit_window(&self) -> chrono::Duration {
        i64::try_from(self.edit_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Typing auto-clear timeout.
    #[must_use]
    pub const fn typing_timeout(&self) -> Duration {
        Duration::from_secs(self.typing_timeout_secs)
    }

    /// Offline notification timeout.
    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Clamp a requested page size into the allowed range.
    #[must_use]
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
            .max(1)
    }

    /// Reject values the engine cannot represent.
    pub fn validate(&self) -> AppResult<()> {
        let edit_window = i64::try_from(self.edit_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        if edit_window.is_none() {
            return Err(AppError::Config(format!(
                "chat.edit_window_secs is too large: {}",
                self.edit_window_secs
            )));
        }
        if self.max_page_size == 0 {
            return Err(AppError::Config(
                "chat.max_page_size must be at least 1".to_string(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(AppError::Config(format!(
                "chat.default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            edit_window_secs: default_edit_window_secs(),
            typing_timeout_secs: default_typing_timeout_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Transaction service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsConfig {
    /// Endpoint that creates a transaction for an accepted offer.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "haggle:".to_string()
}

const fn default_edit_window_secs() -> u64 {
    5 * 60
}

const fn default_typing_timeout_secs() -> u64 {
    10
}

const fn default_notify_timeout_secs() -> u64 {
    5
}

const fn default_page_size() -> u64 {
    20
}

const fn default_max_page_size() -> u64 {
    100
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `HAGGLE_ENV`)
    /// 4. Environment variables with `HAGGLE_` prefix
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("HAGGLE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("HAGGLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.chat.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_config_defaults() {
        let chat = ChatConfig::default();
        assert_eq!(chat.edit_window_secs, 300);
        assert_eq!(chat.typing_timeout(), Duration::from_secs(10));
        assert_eq!(chat.edit_window(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_chat_config_rejects_unrepresentable_values() {
        let huge_window = ChatConfig {
            edit_window_secs: u64::MAX,
            ..ChatConfig::default()
        };
        assert!(matches!(huge_window.validate(), Err(AppError::Config(_))));
        assert_eq!(huge_window.edit_window(), chrono::Duration::MAX);

        let no_pages = ChatConfig {
            max_page_size: 0,
            ..ChatConfig::default()
        };
        assert!(matches!(no_pages.validate(), Err(AppError::Config(_))));
        assert_eq!(no_pages.page_size(Some(10)), 1);

        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let chat = ChatConfig::default();
        assert_eq!(chat.page_size(None), 20);
        assert_eq!(chat.page_size(Some(0)), 1);
        assert_eq!(chat.page_size(Some(5000)), 100);
        assert_eq!(chat.page_size(Some(42)), 42);
    }
}
