//! Registry write-back after a verified payment.
//!
//! Writes run as detached tasks so a slow confirmation never delays the
//! access decision. A write that still fails after all attempts is left for
//! reconciliation: the registry keeps showing the identity as expired, so its
//! next request walks the tiers again and schedules a fresh write.

use crate::error::{Error, Result};
use crate::event::{GatewayEvent, GatewayEventsSender};
use crate::identity::canonical_address;
use crate::registry::{AccessRecord, RegistryClient, WriteReceipt};
use alloy::primitives::Address;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Retry policy for registry writes.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after each failure.
    pub initial_backoff: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Handle to a scheduled write-back.
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<Result<WriteReceipt>>,
}

impl SyncHandle {
    /// Wait for the write-back to finish.
    ///
    /// # Errors
    ///
    /// Returns the final write error, or [`Error::WriteFailed`] if the task
    /// itself was aborted.
    pub async fn wait(self) -> Result<WriteReceipt> {
        self.task
            .await
            .map_err(|e| Error::WriteFailed(format!("write-back task failed: {e}")))?
    }

    /// Returns true once the write-back has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Writes refreshed access records back to the registry.
#[derive(Clone)]
pub struct Synchronizer {
    registry: RegistryClient,
    policy: SyncPolicy,
    events: GatewayEventsSender,
}

impl Synchronizer {
    /// Create a synchronizer.
    #[must_use]
    pub fn new(registry: RegistryClient, policy: SyncPolicy, events: GatewayEventsSender) -> Self {
        Self {
            registry,
            policy,
            events,
        }
    }

    /// Schedule a write-back on a background task.
    #[must_use]
    pub fn schedule(&self, address: Address, record: AccessRecord) -> SyncHandle {
        let sync = self.clone();
        let task = tokio::spawn(async move { sync.write_with_retry(&address, &record).await });
        SyncHandle { task }
    }

    /// Write `record`, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once every attempt has failed.
    pub async fn write_with_retry(
        &self,
        address: &Address,
        record: &AccessRecord,
    ) -> Result<WriteReceipt> {
        let attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let key = canonical_address(address);

        let mut attempt = 1;
        loop {
            match self.registry.write(address, record).await {
                Ok(receipt) => {
                    info!(address = %key, attempt, "Registry write-back confirmed");
                    let _ = self.events.send(GatewayEvent::SyncCompleted {
                        address: key,
                        tx_hash: receipt.tx_hash.clone(),
                    });
                    return Ok(receipt);
                }
                Err(e) if attempt < attempts && e.is_retryable() => {
                    warn!(
                        address = %key,
                        attempt,
                        "Registry write-back failed, retrying in {backoff:?}: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        address = %key,
                        attempt,
                        "Registry write-back abandoned, pending reconciliation: {e}"
                    );
                    let _ = self.events.send(GatewayEvent::SyncFailed {
                        address: key,
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }
}
