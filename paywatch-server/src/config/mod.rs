//! Configuration module for paywatch-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables, and turns it into the typed runtime
//! configuration of `paywatch-core`.

pub mod file;

use crate::config::file::FileConfig;
use paywatch_core::chain::codec::normalize_address;
use paywatch_core::config::{ChainConfig, StreamConfig, WorkerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Most fractional digits a token amount can carry.
const MAX_TOKEN_DECIMALS: u32 = 28;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Server section of the loaded configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub stream: StreamConfig,
    pub worker: WorkerConfig,
}

impl LoadedConfig {
    /// Database connections: one per worker plus a few for the scheduler,
    /// the watcher and the HTTP routes.
    pub fn database_pool_size(&self) -> u32 {
        u32::try_from(self.worker.threads)
            .unwrap_or(u32::MAX)
            .saturating_add(4)
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        build_loaded_config(file_config)
    }
}

fn validation_error(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn validate_topic(topic: &str) -> Result<String, ConfigError> {
    let topic = topic.to_ascii_lowercase();
    let digits = topic
        .strip_prefix("0x")
        .ok_or_else(|| validation_error(format!("transfer_topic {topic} lacks 0x prefix")))?;
    if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(validation_error(format!(
            "transfer_topic {topic} is not a 32-byte hex value"
        )));
    }
    Ok(topic)
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let FileConfig {
        server,
        chain,
        stream,
        worker,
    } = file_config;

    if !matches!(chain.rpc_url.scheme(), "http" | "https") {
        return Err(validation_error(format!(
            "rpc_url must be http(s), got {}",
            chain.rpc_url
        )));
    }
    if !matches!(chain.ws_url.scheme(), "ws" | "wss") {
        return Err(validation_error(format!(
            "ws_url must be ws(s), got {}",
            chain.ws_url
        )));
    }
    let contract_address = normalize_address(&chain.contract_address)
        .map_err(|e| validation_error(format!("contract_address: {e}")))?;
    if chain.contract_address.len() != 42 {
        return Err(validation_error(format!(
            "contract_address {} is not a 20-byte hex address",
            chain.contract_address
        )));
    }
    let transfer_topic = validate_topic(&chain.transfer_topic)?;
    if chain.token_decimals > MAX_TOKEN_DECIMALS {
        return Err(validation_error(format!(
            "token_decimals must be at most {MAX_TOKEN_DECIMALS}"
        )));
    }
    if chain.rpc_timeout_secs == 0 {
        return Err(validation_error("rpc_timeout_secs must be positive"));
    }
    if worker.threads == 0 {
        return Err(validation_error("worker threads must be positive"));
    }
    if worker.max_attempts == 0 {
        return Err(validation_error("max_attempts must be positive"));
    }
    if worker.poll_interval_secs == 0 || stream.keepalive_secs == 0 || stream.idle_timeout_secs == 0
    {
        return Err(validation_error(
            "poll_interval_secs, keepalive_secs and idle_timeout_secs must be positive",
        ));
    }

    Ok(LoadedConfig {
        server: ServerConfig {
            listen: server.listen,
        },
        chain: ChainConfig {
            rpc_url: chain.rpc_url,
            ws_url: chain.ws_url,
            rpc_timeout: Duration::from_secs(chain.rpc_timeout_secs),
            contract_address,
            transfer_topic,
            token_decimals: chain.token_decimals,
        },
        stream: StreamConfig {
            keepalive_interval: Duration::from_secs(stream.keepalive_secs),
            reconnect_delay: Duration::from_secs(stream.reconnect_delay_secs),
            idle_timeout: Duration::from_secs(stream.idle_timeout_secs),
        },
        worker: WorkerConfig {
            poll_interval: Duration::from_secs(worker.poll_interval_secs),
            threads: worker.threads,
            max_attempts: worker.max_attempts,
            backoff_base: Duration::from_secs(worker.backoff_base_secs),
            postback_timeout: Duration::from_secs(worker.postback_timeout_secs),
        },
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
