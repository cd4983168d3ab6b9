//! JSON-RPC adapters for the ledger.
//!
//! [`RpcTransactionSource`] backs the direct payment lookup and
//! [`ContractRegistry`] backs the subscription registry. Both hold an erased
//! alloy provider so the rest of the crate never sees transport types.

use crate::error::{Error, Result};
use crate::payment::{ObservedReceipt, ObservedTransaction, TransactionSource};
use crate::registry::{RegistryBackend, WriteReceipt};
use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

sol! {
    #[sol(rpc)]
    interface IStateRegistry {
        function getState() external view returns (string memory);
        function setState(string[] calldata keys, string[] calldata values) external;
    }
}

/// Parse a hex private key into a signer.
///
/// # Errors
///
/// Returns [`Error::Config`] if the key is not a valid secp256k1 scalar.
pub fn parse_operator_key(key: &str) -> Result<PrivateKeySigner> {
    PrivateKeySigner::from_str(key.trim())
        .map_err(|e| Error::Config(format!("invalid operator key: {e}")))
}

fn http_provider(rpc_url: &str, signer: Option<PrivateKeySigner>) -> Result<DynProvider> {
    let url = rpc_url
        .parse()
        .map_err(|e| Error::Config(format!("invalid RPC URL '{rpc_url}': {e}")))?;

    Ok(match signer {
        Some(signer) => ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased(),
        None => ProviderBuilder::new().connect_http(url).erased(),
    })
}

fn upstream(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Upstream(format!("{context}: {e}"))
}

/// Reads transactions, receipts and blocks from a JSON-RPC node.
#[derive(Clone)]
pub struct RpcTransactionSource {
    provider: DynProvider,
}

impl RpcTransactionSource {
    /// Connect to `rpc_url`. No request is made until first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid.
    pub fn connect(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: http_provider(rpc_url, None)?,
        })
    }
}

#[async_trait]
impl TransactionSource for RpcTransactionSource {
    async fn transaction(&self, hash: B256) -> Result<Option<ObservedTransaction>> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| upstream("eth_getTransactionByHash", e))?;

        Ok(tx.map(|tx| ObservedTransaction {
            hash,
            from: tx.inner.signer(),
            to: tx.to(),
            value: tx.value(),
        }))
    }

    async fn receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| upstream("eth_getTransactionReceipt", e))?;

        Ok(receipt.map(|r| ObservedReceipt {
            succeeded: r.status(),
            block_number: r.block_number,
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .map_err(|e| upstream("eth_getBlockByNumber", e))?;

        Ok(block.map(|b| b.header.timestamp))
    }
}

/// Registry backed by the versioned state contract.
pub struct ContractRegistry {
    contract: IStateRegistry::IStateRegistryInstance<DynProvider>,
    can_write: bool,
    confirmation_timeout: Duration,
}

impl ContractRegistry {
    /// Bind to the registry contract at `address`.
    ///
    /// Without an operator key the registry is read-only and every write
    /// fails with [`Error::WriteFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL or key is invalid.
    pub fn connect(
        rpc_url: &str,
        address: Address,
        operator_key: Option<&str>,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let signer = operator_key.map(parse_operator_key).transpose()?;
        let can_write = signer.is_some();
        if let Some(signer) = &signer {
            info!(operator = %signer.address(), registry = %address, "Registry writes enabled");
        }

        let provider = http_provider(rpc_url, signer)?;
        Ok(Self {
            contract: IStateRegistry::new(address, provider),
            can_write,
            confirmation_timeout,
        })
    }

    /// Returns true if an operator key is configured.
    #[must_use]
    pub fn can_write(&self) -> bool {
        self.can_write
    }
}

#[async_trait]
impl RegistryBackend for ContractRegistry {
    async fn fetch_document(&self) -> Result<String> {
        self.contract
            .getState()
            .call()
            .await
            .map_err(|e| Error::RegistryUnavailable(format!("getState: {e}")))
    }

    async fn submit_entries(&self, keys: Vec<String>, values: Vec<String>) -> Result<WriteReceipt> {
        if !self.can_write {
            return Err(Error::WriteFailed("no operator key configured".to_string()));
        }

        debug!(?keys, "Submitting registry entries");
        let pending = self
            .contract
            .setState(keys, values)
            .send()
            .await
            .map_err(|e| Error::WriteFailed(format!("setState rejected: {e}")))?;

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| Error::WriteFailed(format!("setState not confirmed: {e}")))?;

        if !receipt.status() {
            return Err(Error::WriteFailed(format!(
                "setState reverted in {}",
                receipt.transaction_hash
            )));
        }

        Ok(WriteReceipt {
            tx_hash: receipt.transaction_hash.to_string(),
            block_number: receipt.block_number,
        })
    }
}
