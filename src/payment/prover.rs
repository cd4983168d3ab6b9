//! Payment prover combining direct lookup and history scan.

use crate::error::{Error, Result};
use crate::identity::canonical_address;
use crate::payment::chain::{ObservedReceipt, TransactionSource};
use crate::payment::indexer::HistoryIndexer;
use crate::payment::{unix_to_utc, PaymentEvidence, PaymentTerms};
use alloy::primitives::{Address, B256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the payment prover.
#[derive(Debug, Clone)]
pub struct PaymentProverConfig {
    /// How long to wait for a referenced transaction to be mined.
    pub confirmation_timeout: Duration,
    /// Interval between receipt polls while waiting.
    pub poll_interval: Duration,
    /// Timeout for a single RPC call.
    pub rpc_timeout: Duration,
}

impl Default for PaymentProverConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

/// Finds confirmed payments that satisfy the subscription terms.
///
/// Combines:
/// 1. Direct JSON-RPC lookup of a caller-supplied transaction hash
/// 2. Indexer scan of the caller's history, newest first
pub struct PaymentProver {
    terms: PaymentTerms,
    chain: Arc<dyn TransactionSource>,
    indexer: Arc<dyn HistoryIndexer>,
    config: PaymentProverConfig,
}

impl PaymentProver {
    /// Create a new payment prover.
    #[must_use]
    pub fn new(
        terms: PaymentTerms,
        chain: Arc<dyn TransactionSource>,
        indexer: Arc<dyn HistoryIndexer>,
        config: PaymentProverConfig,
    ) -> Self {
        Self {
            terms,
            chain,
            indexer,
            config,
        }
    }

    /// Terms payments are checked against.
    #[must_use]
    pub fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    /// Verify a specific transaction as payment by `payer`.
    ///
    /// Waits up to the confirmation timeout for the transaction to be mined.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(evidence))` - The transaction is a confirmed qualifying payment
    /// * `Ok(None)` - Unknown, reverted, underpaid, or sent elsewhere
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be queried or confirmation does
    /// not arrive in time.
    pub async fn verify_by_reference(
        &self,
        payer: &Address,
        tx_hash: B256,
    ) -> Result<Option<PaymentEvidence>> {
        let Some(tx) = self.rpc(self.chain.transaction(tx_hash)).await? else {
            debug!(%tx_hash, "Referenced transaction not known to the node");
            return Ok(None);
        };

        if tx.from != *payer {
            warn!(
                %tx_hash,
                payer = %canonical_address(payer),
                sender = %canonical_address(&tx.from),
                "Referenced transaction was sent by another identity"
            );
            return Ok(None);
        }

        if !self.terms.qualifies(tx.to, tx.value) {
            debug!(
                %tx_hash,
                value = %tx.value,
                "Referenced transaction does not pay the subscription fee to the vault"
            );
            return Ok(None);
        }

        let receipt = self.await_receipt(tx_hash).await?;
        if !receipt.succeeded {
            info!(%tx_hash, "Referenced payment reverted");
            return Ok(None);
        }

        let block = receipt
            .block_number
            .ok_or_else(|| Error::Upstream(format!("receipt for {tx_hash} has no block")))?;
        let timestamp = self
            .rpc(self.chain.block_timestamp(block))
            .await?
            .ok_or_else(|| Error::Upstream(format!("block {block} not found")))?;
        let confirmed_at = unix_to_utc(timestamp)
            .ok_or_else(|| Error::Upstream(format!("block {block} has invalid timestamp")))?;

        info!(%tx_hash, block, "Payment confirmed by reference");

        Ok(Some(PaymentEvidence {
            tx_hash,
            sender: tx.from,
            recipient: self.terms.vault,
            amount: tx.value,
            confirmed_at,
        }))
    }

    /// Scan the history of `payer` for its most recent qualifying payment.
    ///
    /// Entries are ordered newest first and the scan stops at the first
    /// match, so one payment is credited at most once per scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the indexer cannot be queried.
    pub async fn scan_history(&self, payer: &Address) -> Result<Option<PaymentEvidence>> {
        let mut history = self.indexer.transactions(payer).await?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        debug!(
            payer = %canonical_address(payer),
            "Scanning {} history entries",
            history.len()
        );

        let found = history.into_iter().find(|tx| {
            !tx.failed && tx.from == *payer && self.terms.qualifies(tx.to, tx.value)
        });

        let Some(tx) = found else {
            return Ok(None);
        };

        let Some(confirmed_at) = unix_to_utc(tx.timestamp) else {
            warn!(tx_hash = %tx.hash, "Indexed payment has invalid timestamp");
            return Ok(None);
        };

        info!(
            tx_hash = %tx.hash,
            payer = %canonical_address(payer),
            "Payment found in history scan"
        );

        Ok(Some(PaymentEvidence {
            tx_hash: tx.hash,
            sender: tx.from,
            recipient: self.terms.vault,
            amount: tx.value,
            confirmed_at,
        }))
    }

    async fn await_receipt(&self, tx_hash: B256) -> Result<ObservedReceipt> {
        tokio::time::timeout(self.config.confirmation_timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| {
                Error::UpstreamTimeout(format!(
                    "transaction {tx_hash} not confirmed within {:?}",
                    self.config.confirmation_timeout
                ))
            })?
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<ObservedReceipt> {
        loop {
            if let Some(receipt) = self.rpc(self.chain.receipt(tx_hash)).await? {
                return Ok(receipt);
            }
            debug!(%tx_hash, "Payment pending, waiting for confirmation");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn rpc<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.rpc_timeout, call)
            .await
            .map_err(|_| {
                Error::UpstreamTimeout(format!(
                    "RPC call exceeded {:?}",
                    self.config.rpc_timeout
                ))
            })?
    }
}
