//! Configuration for sourcing-gateway.

use crate::error::{Error, Result};
use crate::gateway::{NonceGuard, ScanThrottle, SyncPolicy};
use crate::identity::parse_address;
use crate::payment::{EtherscanConfig, PaymentProverConfig, PaymentTerms};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Ledger node and registry contract.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Transaction history indexer.
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Subscription terms.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Registry write-back.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Nonce replay guard and scan throttle.
    #[serde(default)]
    pub replay: ReplayConfig,

    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Address of the registry contract.
    #[serde(default)]
    pub registry_address: Option<String>,

    /// Hex private key of the operator identity that writes the registry.
    /// Usually supplied through the environment rather than the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_key: Option<String>,

    /// Timeout for a single RPC call, in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// How long to wait for a referenced payment to confirm, in seconds.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Receipt poll interval, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Indexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Enable history scans.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Etherscan-compatible API URL.
    #[serde(default = "default_indexer_url")]
    pub api_url: String,

    /// API key. Scans are disabled without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chain id for multichain explorer APIs.
    #[serde(default)]
    pub chain_id: Option<u64>,

    /// Maximum history entries fetched per scan.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Query timeout in seconds.
    #[serde(default = "default_indexer_timeout")]
    pub timeout_secs: u64,
}

/// Subscription terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Vault receiving subscription payments.
    #[serde(default)]
    pub vault_address: String,

    /// Minimum payment in ether.
    #[serde(default = "default_fee")]
    pub subscription_fee: String,

    /// Capital granted on each payment.
    #[serde(default = "default_refill")]
    pub refill_tokens: u64,

    /// Subscription length in days.
    #[serde(default = "default_subscription_days")]
    pub subscription_days: u32,
}

/// Registry write-back configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts per write, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_backoff")]
    pub initial_backoff_ms: u64,

    /// Registry read timeout, in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Time allowed for one write to confirm, in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

/// Replay and throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Reject agreement nonces that already produced a grant.
    #[serde(default = "default_true")]
    pub enforce_nonces: bool,

    /// Maximum remembered nonces.
    #[serde(default = "default_guard_capacity")]
    pub nonce_capacity: usize,

    /// Minimum seconds between two history scans of one identity.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Maximum identities tracked by the throttle.
    #[serde(default = "default_guard_capacity")]
    pub scan_capacity: usize,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            indexer: IndexerConfig::default(),
            payment: PaymentConfig::default(),
            sync: SyncConfig::default(),
            replay: ReplayConfig::default(),
            server: ServerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            registry_address: None,
            operator_key: None,
            rpc_timeout_secs: default_rpc_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_indexer_url(),
            api_key: None,
            chain_id: None,
            page_size: default_page_size(),
            timeout_secs: default_indexer_timeout(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            vault_address: String::new(),
            subscription_fee: default_fee(),
            refill_tokens: default_refill(),
            subscription_days: default_subscription_days(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_backoff(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enforce_nonces: true,
            nonce_capacity: default_guard_capacity(),
            scan_interval_secs: default_scan_interval(),
            scan_capacity: default_guard_capacity(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "sourcing-gateway")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("sourcing-gateway.toml"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_indexer_url() -> String {
    EtherscanConfig::default().api_url
}

fn default_fee() -> String {
    "0.001".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

const fn default_true() -> bool {
    true
}

const fn default_rpc_timeout() -> u64 {
    10
}

const fn default_confirmation_timeout() -> u64 {
    60
}

const fn default_poll_interval() -> u64 {
    2000
}

const fn default_page_size() -> u32 {
    1000
}

const fn default_indexer_timeout() -> u64 {
    15
}

const fn default_refill() -> u64 {
    1000
}

const fn default_subscription_days() -> u32 {
    30
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff() -> u64 {
    2000
}

const fn default_read_timeout() -> u64 {
    10
}

const fn default_write_timeout() -> u64 {
    120
}

const fn default_guard_capacity() -> usize {
    100_000
}

const fn default_scan_interval() -> u64 {
    15
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that every value the gateway needs at startup is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.payment_terms()?;
        self.registry_address()?;
        if self.sync.max_attempts == 0 {
            return Err(Error::Config("sync.max_attempts must be at least 1".to_string()));
        }
        if self.chain.rpc_url.trim().is_empty() {
            return Err(Error::Config("chain.rpc_url is required".to_string()));
        }
        Ok(())
    }

    /// Subscription terms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the vault address or fee is invalid.
    pub fn payment_terms(&self) -> Result<PaymentTerms> {
        let vault = config_address("payment.vault_address", &self.payment.vault_address)?;
        PaymentTerms::new(
            vault,
            &self.payment.subscription_fee,
            self.payment.refill_tokens,
            self.payment.subscription_days,
        )
    }

    /// Registry contract address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if it is missing or invalid.
    pub fn registry_address(&self) -> Result<Address> {
        let raw = self.chain.registry_address.as_deref().unwrap_or_default();
        config_address("chain.registry_address", raw)
    }

    /// Indexer client configuration.
    #[must_use]
    pub fn etherscan(&self) -> EtherscanConfig {
        EtherscanConfig {
            api_url: self.indexer.api_url.clone(),
            api_key: self.indexer.api_key.clone(),
            chain_id: self.indexer.chain_id,
            page_size: self.indexer.page_size,
            query_timeout: Duration::from_secs(self.indexer.timeout_secs),
            enabled: self.indexer.enabled,
        }
    }

    /// Payment prover timing.
    #[must_use]
    pub fn prover(&self) -> PaymentProverConfig {
        PaymentProverConfig {
            confirmation_timeout: Duration::from_secs(self.chain.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.chain.poll_interval_ms),
            rpc_timeout: Duration::from_secs(self.chain.rpc_timeout_secs),
        }
    }

    /// Write-back retry policy.
    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: self.sync.max_attempts,
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
        }
    }

    /// Nonce replay guard.
    #[must_use]
    pub fn nonce_guard(&self) -> NonceGuard {
        if self.replay.enforce_nonces {
            NonceGuard::with_capacity(self.replay.nonce_capacity)
        } else {
            NonceGuard::disabled()
        }
    }

    /// Ledger-scan throttle.
    #[must_use]
    pub fn scan_throttle(&self) -> ScanThrottle {
        ScanThrottle::new(
            Duration::from_secs(self.replay.scan_interval_secs),
            self.replay.scan_capacity,
        )
    }
}

fn config_address(field: &str, raw: &str) -> Result<Address> {
    if raw.trim().is_empty() {
        return Err(Error::Config(format!("{field} is required")));
    }
    parse_address(raw).map_err(|e| Error::Config(format!("{field}: {e}")))
}
