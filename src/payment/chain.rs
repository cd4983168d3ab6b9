//! Direct transaction lookup seam.

use crate::error::Result;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

/// A transaction as reported by a JSON-RPC node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, absent for contract creation.
    pub to: Option<Address>,
    /// Value transferred in wei.
    pub value: U256,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedReceipt {
    /// False if execution reverted.
    pub succeeded: bool,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

/// Source of individual transactions, receipts and block times.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Look up a transaction by hash. `Ok(None)` if the node does not know it.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be queried.
    async fn transaction(&self, hash: B256) -> Result<Option<ObservedTransaction>>;

    /// Receipt of a transaction. `Ok(None)` while it is still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be queried.
    async fn receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>>;

    /// Unix timestamp of a block.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be queried.
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>>;
}
