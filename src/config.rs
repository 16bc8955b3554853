//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "pond.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://pond.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// PuSH callback URL for a feed
    pub fn callback_url(&self, feed_id: &str) -> String {
        format!("{}/subscriptions/{}", self.base_url(), feed_id)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Outbound federation settings (fan-out and hub traffic)
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Maximum concurrent follower reposts / hub pings per publish
    pub fanout_width: usize,
    /// Per sub-task timeout in seconds
    pub task_timeout_seconds: u64,
    /// HTTP timeout for hub requests in seconds
    pub hub_timeout_seconds: u64,
    /// User-Agent sent to hubs
    pub user_agent: String,
}

impl FederationConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn hub_timeout(&self) -> Duration {
        Duration::from_secs(self.hub_timeout_seconds)
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required by /admin routes (16+ bytes)
    pub token: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RUSTPOND__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/rustpond.db")?
            .set_default("federation.fanout_width", 10)?
            .set_default("federation.task_timeout_seconds", 10)?
            .set_default("federation.hub_timeout_seconds", 30)?
            .set_default("federation.user_agent", "RustPond/0.1.0")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RUSTPOND__*)
            .add_source(
                Environment::with_prefix("RUSTPOND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_ADMIN_TOKEN_BYTES: usize = 16;

        if self.admin.token.len() < MIN_ADMIN_TOKEN_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "admin.token must be at least {} bytes",
                MIN_ADMIN_TOKEN_BYTES
            )));
        }

        if self.federation.fanout_width == 0 {
            return Err(crate::error::AppError::Config(
                "federation.fanout_width must be greater than 0".to_string(),
            ));
        }

        if self.federation.task_timeout_seconds == 0 || self.federation.hub_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "federation timeouts must be greater than 0".to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            if !self.server.protocol.eq_ignore_ascii_case("https") {
                tracing::warn!(
                    domain = %self.server.domain,
                    "Serving plain http callbacks for local development"
                );
            }
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/rustpond-test.db"),
            },
            federation: FederationConfig {
                fanout_width: 10,
                task_timeout_seconds: 10,
                hub_timeout_seconds: 30,
                user_agent: "RustPond/test".to_string(),
            },
            admin: AdminConfig {
                token: "x".repeat(32),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn callback_url_points_at_subscription_endpoint() {
        let config = valid_config();
        assert_eq!(
            config.server.callback_url("01FEED"),
            "http://localhost/subscriptions/01FEED"
        );
    }

    #[test]
    fn validate_rejects_short_admin_token() {
        let mut config = valid_config();
        config.admin.token = "short".to_string();

        let error = config
            .validate()
            .expect_err("admin token shorter than 16 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("admin.token")
        ));
    }

    #[test]
    fn validate_rejects_zero_fanout_width() {
        let mut config = valid_config();
        config.federation.fanout_width = 0;

        let error = config.validate().expect_err("zero fan-out width must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("fanout_width")
        ));
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "pond.example.com".to_string();
        config.server.protocol = "http".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }
}
