//! Block-explorer indexer used for the address-history scan.
//!
//! Talks to an Etherscan-compatible `account/txlist` endpoint. Explorers lag
//! real confirmation, so this is the fallback path behind direct lookup.

use crate::error::{Error, Result};
use crate::identity::canonical_address;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One entry of an address history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, absent for contract creation.
    pub to: Option<Address>,
    /// Value in wei.
    pub value: U256,
    /// Unix timestamp of the including block.
    pub timestamp: u64,
    /// True if execution errored or reverted.
    pub failed: bool,
}

/// Full transaction history of an address.
#[async_trait]
pub trait HistoryIndexer: Send + Sync {
    /// Fetch the transactions touching `address`, in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the indexer cannot be queried.
    async fn transactions(&self, address: &Address) -> Result<Vec<IndexedTransaction>>;
}

/// Configuration for the Etherscan-compatible indexer.
#[derive(Debug, Clone)]
pub struct EtherscanConfig {
    /// Base API URL.
    pub api_url: String,
    /// API key; the indexer is disabled without one.
    pub api_key: Option<String>,
    /// Chain id for multichain explorer APIs.
    pub chain_id: Option<u64>,
    /// Maximum number of history entries requested.
    pub page_size: u32,
    /// Timeout for one history query.
    pub query_timeout: Duration,
    /// Whether to enable the indexer (false = scans never find evidence).
    pub enabled: bool,
}

impl Default for EtherscanConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.etherscan.io/v2/api".to_string(),
            api_key: None,
            chain_id: None,
            page_size: 1000,
            query_timeout: Duration::from_secs(15),
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    message: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxListEntry {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    time_stamp: String,
    #[serde(default)]
    is_error: String,
    #[serde(default, rename = "txreceipt_status")]
    receipt_status: String,
}

impl TxListEntry {
    fn into_transaction(self) -> Option<IndexedTransaction> {
        let to = if self.to.is_empty() {
            None
        } else {
            Some(Address::from_str(&self.to).ok()?)
        };
        Some(IndexedTransaction {
            hash: B256::from_str(&self.hash).ok()?,
            from: Address::from_str(&self.from).ok()?,
            to,
            value: U256::from_str_radix(&self.value, 10).ok()?,
            timestamp: self.time_stamp.parse().ok()?,
            failed: self.is_error == "1" || self.receipt_status == "0",
        })
    }
}

/// Etherscan-compatible history indexer.
pub struct EtherscanIndexer {
    config: EtherscanConfig,
    client: Option<reqwest::Client>,
}

impl EtherscanIndexer {
    /// Create a new indexer client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to initialize.
    pub fn new(config: EtherscanConfig) -> Result<Self> {
        if !config.enabled {
            info!("History indexer disabled - ledger scans will find no payments");
            return Ok(Self {
                config,
                client: None,
            });
        }

        if config.api_key.as_deref().is_none_or(str::is_empty) {
            warn!("No indexer API key configured - history indexer disabled");
            return Ok(Self {
                config: EtherscanConfig {
                    enabled: false,
                    ..config
                },
                client: None,
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.query_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build indexer client: {e}")))?;

        info!("History indexer initialized ({})", config.api_url);

        Ok(Self {
            config,
            client: Some(client),
        })
    }

    /// Check if the indexer is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn query(&self, address: &Address) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", canonical_address(address)),
            // No end block: the explorer then reads up to the chain head.
            ("startblock", "0".to_string()),
            ("page", "1".to_string()),
            ("offset", self.config.page_size.to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(chain_id) = self.config.chain_id {
            query.push(("chainid", chain_id.to_string()));
        }
        if let Some(key) = &self.config.api_key {
            query.push(("apikey", key.clone()));
        }
        query
    }
}

#[async_trait]
impl HistoryIndexer for EtherscanIndexer {
    async fn transactions(&self, address: &Address) -> Result<Vec<IndexedTransaction>> {
        let Some(client) = &self.client else {
            debug!("No indexer client, returning empty history");
            return Ok(Vec::new());
        };

        let response = client
            .get(&self.config.api_url)
            .query(&self.query(address))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(format!("indexer query timed out: {e}"))
                } else {
                    Error::Upstream(format!("indexer request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "indexer returned HTTP {}",
                response.status()
            )));
        }

        let body: TxListResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("indexer response unreadable: {e}")))?;

        if body.status != "1" {
            // An address with no history is reported as a failed status.
            if body.message.starts_with("No transactions found") {
                return Ok(Vec::new());
            }
            let detail = body.result.as_str().unwrap_or_default();
            return Err(Error::Upstream(format!(
                "indexer error: {} {detail}",
                body.message
            )));
        }

        let entries: Vec<TxListEntry> = serde_json::from_value(body.result)
            .map_err(|e| Error::Upstream(format!("indexer result unreadable: {e}")))?;
        let total = entries.len();

        let transactions: Vec<IndexedTransaction> = entries
            .into_iter()
            .filter_map(TxListEntry::into_transaction)
            .collect();

        if transactions.len() < total {
            debug!(
                "Skipped {} unparsable history entries",
                total - transactions.len()
            );
        }

        Ok(transactions)
    }
}
