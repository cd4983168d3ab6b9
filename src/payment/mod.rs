//! Payment proof for subscription access.
//!
//! A payment qualifies when it moves at least the subscription fee from the
//! claimed identity to the vault and was confirmed without reverting. Two
//! strategies find one:
//!
//! ```text
//!  txHash supplied?
//!        │
//!   ┌────┴────┐
//!   │         │
//!  YES        NO
//!   │         │
//!   ▼         │
//! Direct RPC  │
//! lookup      │
//!   │         │
//!  MISS ──────┤
//!   │         ▼
//!  FOUND   Indexer history scan
//!   │      (newest first, stop at first match)
//!   │         │
//!   ▼         ▼
//!     PaymentEvidence
//! ```
//!
//! The direct lookup is preferred because block-explorer indexes trail real
//! confirmation by minutes.

mod chain;
mod indexer;
mod prover;

pub use chain::{ObservedReceipt, ObservedTransaction, TransactionSource};
pub use indexer::{EtherscanConfig, EtherscanIndexer, HistoryIndexer, IndexedTransaction};
pub use prover::{PaymentProver, PaymentProverConfig};

use crate::error::{Error, Result};
use crate::identity::canonical_address;
use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fixed commercial parameters of the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    /// Address qualifying payments must be sent to.
    pub vault: Address,
    /// Minimum payment in wei.
    pub fee: U256,
    /// Capital granted by every successful synchronization.
    pub refill_tokens: u64,
    /// Validity added to the payment's confirmation time.
    pub subscription_period: Duration,
}

impl PaymentTerms {
    /// Build terms from a decimal ether fee such as `"0.001"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the fee is not a valid ether amount or the
    /// period is not positive.
    pub fn new(
        vault: Address,
        fee_ether: &str,
        refill_tokens: u64,
        subscription_days: u32,
    ) -> Result<Self> {
        let fee = parse_ether(fee_ether.trim())
            .map_err(|e| Error::Config(format!("invalid subscription fee '{fee_ether}': {e}")))?;
        if subscription_days == 0 {
            return Err(Error::Config(
                "subscription period must be at least one day".to_string(),
            ));
        }
        Ok(Self {
            vault,
            fee,
            refill_tokens,
            subscription_period: Duration::days(i64::from(subscription_days)),
        })
    }

    /// Returns true if a transfer of `amount` to `recipient` pays the fee.
    #[must_use]
    pub fn qualifies(&self, recipient: Option<Address>, amount: U256) -> bool {
        recipient == Some(self.vault) && amount >= self.fee
    }

    /// Fee as a decimal ether string without trailing zeros.
    #[must_use]
    pub fn fee_display(&self) -> String {
        trim_decimal(&format_ether(self.fee))
    }

    /// Expiry earned by a payment confirmed at `confirmed_at`.
    ///
    /// Returns `None` when the expiry is past the representable range.
    #[must_use]
    pub fn expiry_from(&self, confirmed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        confirmed_at.checked_add_signed(self.subscription_period)
    }

    /// Payment instructions returned with a denial.
    #[must_use]
    pub fn fulfillment(&self) -> Fulfillment {
        Fulfillment {
            vault: canonical_address(&self.vault),
            amount: self.fee_display(),
        }
    }
}

/// A confirmed payment that satisfies the subscription terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvidence {
    /// Hash of the payment transaction.
    pub tx_hash: B256,
    /// Identity that paid.
    pub sender: Address,
    /// Vault that received the payment.
    pub recipient: Address,
    /// Amount in wei.
    pub amount: U256,
    /// Timestamp of the confirming block.
    pub confirmed_at: DateTime<Utc>,
}

/// Where and how much to pay to obtain access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Vault address.
    pub vault: String,
    /// Decimal ether amount.
    pub amount: String,
}

fn trim_decimal(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Convert a unix timestamp in seconds to UTC.
pub(crate) fn unix_to_utc(seconds: u64) -> Option<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}
