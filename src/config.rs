use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_path: PathBuf,
    pub log: LogConfig,
    pub search: SearchApiConfig,
    pub agent: AgentConfig,
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub log_path: PathBuf,
    pub level: String,
}

#[derive(Clone, Debug)]
pub struct SearchApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    /// persistent socket, reconnecting forever
    Push,
    /// periodic requests to the pending command endpoint
    Poll,
    /// push, degrading to poll when the socket keeps failing to connect
    Auto,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" | "ws" | "websocket" => Ok(Self::Push),
            "poll" => Ok(Self::Poll),
            "auto" => Ok(Self::Auto),
            _ => Err(ConfigError::Invalid {
                name: "AGENT_TRANSPORT",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub base_origin: String,
    pub token: Option<String>,
    pub mode: TransportMode,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub fallback_after: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_origin: "http://127.0.0.1:8000".to_string(),
            token: None,
            mode: TransportMode::Auto,
            reconnect_delay: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(1500),
            fallback_after: 3,
        }
    }
}

impl Config {
    /// Reads the config from the environment, loading `.env` first if there is one
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let search_base = var("SEARCH_API_BASE").unwrap_or_else(|| "http://127.0.0.1:8000".into());
        let defaults = AgentConfig::default();

        Ok(Config {
            data_path: var("DATA_PATH").unwrap_or_else(|| "./data".into()).into(),
            log: LogConfig {
                log_path: var("LOG_PATH").unwrap_or_else(|| "./logs".into()).into(),
                level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            },
            search: SearchApiConfig {
                base_url: search_base.clone(),
                token: var("SEARCH_API_TOKEN"),
                timeout: Duration::from_secs(parse(
                    "SEARCH_API_TIMEOUT_SECS",
                    var("SEARCH_API_TIMEOUT_SECS"),
                    20,
                )?),
            },
            agent: AgentConfig {
                base_origin: var("AGENT_BASE_ORIGIN").unwrap_or(search_base),
                token: var("AGENT_TOKEN"),
                mode: match var("AGENT_TRANSPORT") {
                    Some(mode) => mode.parse()?,
                    None => defaults.mode,
                },
                reconnect_delay: Duration::from_millis(parse(
                    "AGENT_RECONNECT_MS",
                    var("AGENT_RECONNECT_MS"),
                    defaults.reconnect_delay.as_millis() as u64,
                )?),
                poll_interval: Duration::from_millis(parse(
                    "AGENT_POLL_MS",
                    var("AGENT_POLL_MS"),
                    defaults.poll_interval.as_millis() as u64,
                )?),
                fallback_after: parse(
                    "AGENT_FALLBACK_AFTER",
                    var("AGENT_FALLBACK_AFTER"),
                    defaults.fallback_after,
                )?,
            },
        })
    }
}

fn parse<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
