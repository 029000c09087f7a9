//! services/bridge/src/config.rs
//!
//! Defines the bridge configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// WebSocket endpoint of the peer agent.
    pub ws_url: String,
    /// Value of the `game` field on every outbound envelope.
    pub game_name: String,
    pub log_level: Level,
    /// Registry key of the procedure loaded on the first connection.
    pub procedure: String,
    pub tick_interval: Duration,
    pub auto_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000".to_string(),
            game_name: "Neuro-Sama Surgery".to_string(),
            log_level: Level::INFO,
            procedure: "ventriculostomy".to_string(),
            tick_interval: Duration::from_millis(50),
            auto_connect: true,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to keep tests hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        // --- Connection Settings ---
        let ws_url = lookup("NEURO_WS_URL").unwrap_or(defaults.ws_url);
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "NEURO_WS_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", ws_url),
            ));
        }
        let game_name = lookup("GAME_NAME").unwrap_or(defaults.game_name);

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Procedure Settings ---
        let procedure = lookup("PROCEDURE").unwrap_or(defaults.procedure);

        let tick_interval = match lookup("TICK_INTERVAL_MS") {
            Some(raw) => {
                let ms = raw.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("TICK_INTERVAL_MS".to_string(), e.to_string())
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue(
                        "TICK_INTERVAL_MS".to_string(),
                        "must be greater than zero".to_string(),
                    ));
                }
                Duration::from_millis(ms)
            }
            None => defaults.tick_interval,
        };

        let auto_connect = match lookup("AUTO_CONNECT") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "AUTO_CONNECT".to_string(),
                    format!("'{}' is not a boolean", raw),
                )
            })?,
            None => defaults.auto_connect,
        };

        Ok(Self {
            ws_url,
            game_name,
            log_level,
            procedure,
            tick_interval,
            auto_connect,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
