// Runtime configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::bridge::{BridgeSettings, DEFAULT_FALLBACK_MESSAGE};
use crate::mcp::client::ClientOptions;
use crate::mcp::types::ServerDescriptor;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";
pub const DEFAULT_PORT: u16 = 8081;

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY (or GOOGLE_API_KEY) must be set")]
    MissingApiKey,

    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("failed to read MCP servers file {path}: {source}")]
    ServersFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MCP servers file {path} is not a JSON array of server descriptors: {source}")]
    ServersFileFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub port: u16,
    pub database_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub servers_file: Option<PathBuf>,
    pub history_limit: usize,
    pub max_tool_rounds: usize,
    pub fallback_message: String,
    pub watchdog_interval: Duration,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = var("GEMINI_API_KEY")
            .or_else(|| var("GOOGLE_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_or(&var, "GEMINI_TEMPERATURE", 0.7)?,
            max_output_tokens: parse_or(&var, "GEMINI_MAX_OUTPUT_TOKENS", 2048)?,
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            database_url: var("DATABASE_URL"),
            connect_timeout: Duration::from_secs(parse_or(&var, "MCP_CONNECT_TIMEOUT_SECS", 30)?),
            request_timeout: Duration::from_secs(parse_or(&var, "MCP_REQUEST_TIMEOUT_SECS", 10)?),
            servers_file: var("MCP_SERVERS_FILE").map(PathBuf::from),
            history_limit: parse_or(&var, "CHAT_HISTORY_LIMIT", 10)?,
            max_tool_rounds: parse_or(&var, "CHAT_MAX_TOOL_ROUNDS", 10)?,
            fallback_message: var("CHAT_FALLBACK_MESSAGE").unwrap_or_else(|| DEFAULT_FALLBACK_MESSAGE.to_string()),
            watchdog_interval: Duration::from_secs(parse_or(&var, "WATCHDOG_INTERVAL_SECS", 60)?),
            cors_origins: var("CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()),
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            history_limit: self.history_limit,
            max_tool_rounds: self.max_tool_rounds.max(1),
            fallback_message: self.fallback_message.clone(),
        }
    }

    /// Descriptors from `MCP_SERVERS_FILE`, or none when unset.
    pub fn load_servers(&self) -> Result<Vec<ServerDescriptor>, ConfigError> {
        let Some(path) = &self.servers_file else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ServersFile {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ServersFileFormat {
            path: path.clone(),
            source,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
