//! TOML file configuration structures.
//!
//! These structs directly map to the `paywatch.toml` file format.

use paywatch_core::config::DEFAULT_TRANSFER_TOPIC;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port of the health endpoint (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Chain node and token section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Websocket JSON-RPC endpoint.
    pub ws_url: Url,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    pub contract_address: String,
    #[serde(default = "default_transfer_topic")]
    pub transfer_topic: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_transfer_topic() -> String {
    DEFAULT_TRANSFER_TOPIC.to_string()
}

fn default_token_decimals() -> u32 {
    8
}

/// Event stream section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub keepalive_secs: u64,
    pub reconnect_delay_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 10,
            reconnect_delay_secs: 1,
            idle_timeout_secs: 60,
        }
    }
}

/// Reconciliation and verification section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub threads: usize,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub postback_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            threads: 10,
            max_attempts: 5,
            backoff_base_secs: 1,
            postback_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parsing() {
        let toml_str = r#"
[chain]
rpc_url = "http://127.0.0.1:8545"
ws_url = "ws://127.0.0.1:8546"
contract_address = "0xb6ed7644c69416d67b522e20bc294a9a9b405b31"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.chain.rpc_timeout_secs, 30);
        assert_eq!(config.chain.transfer_topic, DEFAULT_TRANSFER_TOPIC);
        assert_eq!(config.chain.token_decimals, 8);
        assert_eq!(config.stream.keepalive_secs, 10);
        assert_eq!(config.worker.threads, 10);
        assert_eq!(config.worker.max_attempts, 5);
    }

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[chain]
rpc_url = "https://node.example.com"
ws_url = "wss://node.example.com/ws"
rpc_timeout_secs = 5
contract_address = "0xb6ed7644c69416d67b522e20bc294a9a9b405b31"
token_decimals = 18

[stream]
keepalive_secs = 30

[worker]
threads = 2
backoff_base_secs = 3
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.chain.rpc_timeout_secs, 5);
        assert_eq!(config.chain.token_decimals, 18);
        assert_eq!(config.stream.keepalive_secs, 30);
        assert_eq!(config.stream.reconnect_delay_secs, 1);
        assert_eq!(config.worker.threads, 2);
        assert_eq!(config.worker.backoff_base_secs, 3);
        assert_eq!(config.worker.poll_interval_secs, 10);
    }

    #[test]
    fn test_chain_section_is_required() {
        assert!(toml::from_str::<FileConfig>("[server]\n").is_err());
    }
}
