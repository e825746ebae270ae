use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, error};

use crate::client::connection::ReconnectPolicy;

/// Application configuration, shared by the relay binary and embedded clients
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// WebSocket endpoint clients connect to
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Compilation service endpoint (POST {code, language})
    pub compile_url: Option<String>,

    /// Request timeout for the compilation service; transport default when unset
    pub compile_timeout_secs: Option<u64>,

    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                config.validate()?;
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "relay_url must be a ws:// or wss:// URL, got '{}'",
                self.relay_url
            )));
        }
        if let Some(url) = &self.compile_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "compile_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.reconnect_max_retries,
            backoff: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn compile_timeout(&self) -> Option<Duration> {
        self.compile_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            relay_url: default_relay_url(),
            compile_url: None,
            compile_timeout_secs: None,
            reconnect_max_retries: default_reconnect_max_retries(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "codecast".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}

fn default_reconnect_max_retries() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}
