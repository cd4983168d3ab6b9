//! Client for the on-chain subscription registry.
//!
//! The registry is a single versioned JSON document held by a ledger
//! contract. Reads fetch the whole document; writes append a new version by
//! setting the two keys belonging to one identity. Only the operator key held
//! by this service ever writes.

mod record;

pub use record::{capital_key, expiry_key, AccessRecord, RegistryDocument};

use crate::error::{Error, Result};
use crate::identity::canonical_address;
use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confirmation of a registry write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Hash of the write transaction.
    pub tx_hash: String,
    /// Block that included the write, when the backend reports it.
    pub block_number: Option<u64>,
}

/// Storage primitive behind the registry client.
///
/// Implementations talk to the ledger contract (see
/// [`crate::chain::ContractRegistry`]) or, in tests, to memory.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Fetch the raw registry document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryUnavailable`] on network or contract failure.
    async fn fetch_document(&self) -> Result<String>;

    /// Submit parallel key/value arrays and wait for confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the write is rejected or reverts.
    async fn submit_entries(&self, keys: Vec<String>, values: Vec<String>)
        -> Result<WriteReceipt>;
}

/// Typed registry client shared by the controller and the synchronizer.
#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RegistryClient {
    /// Create a client over a backend.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            read_timeout,
            write_timeout,
        }
    }

    /// Fetch and parse the registry document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryUnavailable`] if the backend fails or times
    /// out, and [`Error::RegistryCorrupt`] if the payload is not a JSON object.
    pub async fn read(&self) -> Result<RegistryDocument> {
        let raw = match tokio::time::timeout(self.read_timeout, self.backend.fetch_document()).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e @ (Error::RegistryUnavailable(_) | Error::RegistryCorrupt(_)))) => {
                return Err(e)
            }
            Ok(Err(e)) => return Err(Error::RegistryUnavailable(e.to_string())),
            Err(_) => {
                return Err(Error::RegistryUnavailable(format!(
                    "read timed out after {:?}",
                    self.read_timeout
                )))
            }
        };

        let doc = RegistryDocument::parse(&raw)?;
        debug!("Registry document loaded ({} keys)", doc.len());
        Ok(doc)
    }

    /// Look up the access record of one identity.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryClient::read`] failures.
    pub async fn lookup(&self, address: &Address) -> Result<AccessRecord> {
        Ok(self.read().await?.record_for(address))
    }

    /// Write a new record version for `address` and wait for confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamTimeout`] if confirmation does not arrive in
    /// time and [`Error::WriteFailed`] for any other failure.
    pub async fn write(&self, address: &Address, record: &AccessRecord) -> Result<WriteReceipt> {
        let (keys, values) = record.to_entries(address);

        match tokio::time::timeout(self.write_timeout, self.backend.submit_entries(keys, values))
            .await
        {
            Ok(Ok(receipt)) => {
                info!(
                    address = %canonical_address(address),
                    tx_hash = %receipt.tx_hash,
                    "Registry record written"
                );
                Ok(receipt)
            }
            Ok(Err(e @ (Error::WriteFailed(_) | Error::UpstreamTimeout(_)))) => Err(e),
            Ok(Err(e)) => Err(Error::WriteFailed(e.to_string())),
            Err(_) => {
                warn!(
                    address = %canonical_address(address),
                    "Registry write not confirmed within {:?}", self.write_timeout
                );
                Err(Error::UpstreamTimeout(format!(
                    "registry write not confirmed within {:?}",
                    self.write_timeout
                )))
            }
        }
    }
}
