use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// Constructed exactly once and passed by `Arc` into the routers and each
/// relay bridge, so there is no process-wide mutable configuration state.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_bind_address: SocketAddr,
    pub relay_bind_address: SocketAddr,
    pub openai_api_key: String,
    pub realtime_model: String,
    pub chat_model: String,
    pub session_instructions: String,
    pub index_url: Option<String>,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub log_level: Level,
}

const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
const DEFAULT_INSTRUCTIONS: &str = "You are Acme Bank's voice assistant. Give friendly, \
conversational, to-the-point answers to users' questions about the product.";

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_bind_address = parse_addr("API_BIND_ADDRESS", "0.0.0.0:8081")?;
        let relay_bind_address = parse_addr("RELAY_BIND_ADDRESS", "0.0.0.0:8082")?;

        // The relay cannot open upstream sessions without a credential, so
        // this is fatal before any listener binds.
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let session_instructions = std::env::var("SESSION_INSTRUCTIONS")
            .unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string());

        let index_url = std::env::var("INDEX_URL").ok();

        let queue_capacity_str =
            std::env::var("RELAY_QUEUE_CAPACITY").unwrap_or_else(|_| "256".to_string());
        let queue_capacity = queue_capacity_str.parse::<usize>().map_err(|e| {
            ConfigError::InvalidValue("RELAY_QUEUE_CAPACITY".to_string(), e.to_string())
        })?;
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_QUEUE_CAPACITY".to_string(),
                "capacity must be at least 1".to_string(),
            ));
        }

        let timeout_str =
            std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS").unwrap_or_else(|_| "15".to_string());
        let timeout_secs = timeout_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("UPSTREAM_CONNECT_TIMEOUT_SECS".to_string(), e.to_string())
        })?;
        let connect_timeout = Duration::from_secs(timeout_secs);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_bind_address,
            relay_bind_address,
            openai_api_key,
            realtime_model,
            chat_model,
            session_instructions,
            index_url,
            queue_capacity,
            connect_timeout,
            log_level,
        })
    }
}

fn parse_addr(var: &str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}
