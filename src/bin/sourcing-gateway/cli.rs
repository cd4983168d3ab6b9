//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use sourcing_gateway::config::{default_config_path, GatewayConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Tiered access gateway for metered BOM sourcing operations.
#[derive(Parser, Debug)]
#[command(name = "sourcing-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long, short, env = "GATEWAY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// JSON-RPC endpoint of the ledger.
    #[arg(long, env = "GATEWAY_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Registry contract address.
    #[arg(long, env = "GATEWAY_REGISTRY_ADDRESS")]
    pub registry_address: Option<String>,

    /// Vault address receiving subscription payments.
    #[arg(long, env = "GATEWAY_VAULT_ADDRESS")]
    pub vault_address: Option<String>,

    /// Minimum subscription payment in ether.
    #[arg(long, env = "GATEWAY_SUBSCRIPTION_FEE")]
    pub subscription_fee: Option<String>,

    /// Operator private key used for registry writes.
    #[arg(long, env = "GATEWAY_OPERATOR_KEY", hide_env_values = true)]
    pub operator_key: Option<String>,

    /// Indexer API key for history scans.
    #[arg(long, env = "GATEWAY_INDEXER_API_KEY", hide_env_values = true)]
    pub indexer_api_key: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    pub write_config: bool,

    /// Log level.
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "GATEWAY_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Config file path, explicit or default.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }

    /// Convert CLI arguments into a `GatewayConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GatewayConfig> {
        let path = self.config_path();

        // An explicit path must exist; the default path is optional
        let mut config = if self.config.is_some() || path.exists() {
            GatewayConfig::from_file(&path)?
        } else {
            GatewayConfig::default()
        };

        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(rpc_url) = self.rpc_url {
            config.chain.rpc_url = rpc_url;
        }
        if self.registry_address.is_some() {
            config.chain.registry_address = self.registry_address;
        }
        if self.operator_key.is_some() {
            config.chain.operator_key = self.operator_key;
        }
        if let Some(vault) = self.vault_address {
            config.payment.vault_address = vault;
        }
        if let Some(fee) = self.subscription_fee {
            config.payment.subscription_fee = fee;
        }
        if self.indexer_api_key.is_some() {
            config.indexer.api_key = self.indexer_api_key;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok(config)
    }
}
