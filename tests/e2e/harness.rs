//! Test harness with in-memory ledger, registry and indexer.
//!
//! The `TestHarness` wires a real [`AccessGateway`] to fakes that record how
//! often each upstream was called, so tests can assert which tiers ran.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sourcing_gateway::config::GatewayConfig;
use sourcing_gateway::gateway::{NonceGuard, ScanThrottle, SyncPolicy};
use sourcing_gateway::identity::{agreement_message, canonical_address};
use sourcing_gateway::payment::{
    HistoryIndexer, IndexedTransaction, ObservedReceipt, ObservedTransaction, PaymentProver,
    PaymentProverConfig, TransactionSource,
};
use sourcing_gateway::registry::{
    capital_key, expiry_key, RegistryBackend, RegistryClient, WriteReceipt,
};
use sourcing_gateway::{
    AccessGateway, AccessRequest, Error, GatewayBuilder, GatewayComponents, PaymentTerms, Result,
    RunningGateway,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Vault used by every harness.
pub const VAULT: Address = Address::repeat_byte(0x7A);

/// Registry held in memory; writes are applied to the document.
#[derive(Default)]
pub struct FakeRegistry {
    document: Mutex<Map<String, Value>>,
    raw_override: Mutex<Option<String>>,
    offline: Mutex<bool>,
    reject_writes: Mutex<bool>,
    /// Number of document reads.
    pub reads: AtomicUsize,
    /// Number of write submissions.
    pub writes: AtomicUsize,
}

impl FakeRegistry {
    /// Seed a record.
    pub fn seed(&self, address: &Address, expires_on: DateTime<Utc>, capital: u64) {
        let mut doc = self.document.lock();
        doc.insert(
            expiry_key(address),
            Value::String(expires_on.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert(capital_key(address), Value::String(capital.to_string()));
    }

    /// Raw value stored under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.document
            .lock()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Make reads fail.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Make writes fail.
    pub fn set_reject_writes(&self, reject: bool) {
        *self.reject_writes.lock() = reject;
    }

    /// Serve this text instead of the document.
    pub fn set_raw(&self, raw: &str) {
        *self.raw_override.lock() = Some(raw.to_string());
    }
}

#[async_trait]
impl RegistryBackend for FakeRegistry {
    async fn fetch_document(&self) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock() {
            return Err(Error::RegistryUnavailable("connection refused".to_string()));
        }
        if let Some(raw) = self.raw_override.lock().clone() {
            return Ok(raw);
        }
        Ok(Value::Object(self.document.lock().clone()).to_string())
    }

    async fn submit_entries(&self, keys: Vec<String>, values: Vec<String>) -> Result<WriteReceipt> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if *self.reject_writes.lock() {
            return Err(Error::WriteFailed("execution reverted".to_string()));
        }
        let mut doc = self.document.lock();
        for (key, value) in keys.into_iter().zip(values) {
            doc.insert(key, Value::String(value));
        }
        Ok(WriteReceipt {
            tx_hash: format!("0x{n:064x}"),
            block_number: Some(100 + u64::try_from(n).unwrap_or_default()),
        })
    }
}

/// Ledger node holding mined transactions.
#[derive(Default)]
pub struct FakeChain {
    txs: Mutex<HashMap<B256, (ObservedTransaction, ObservedReceipt, u64)>>,
    /// Number of RPC calls of any kind.
    pub calls: AtomicUsize,
}

#[async_trait]
impl TransactionSource for FakeChain {
    async fn transaction(&self, hash: B256) -> Result<Option<ObservedTransaction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.txs.lock().get(&hash).map(|(tx, _, _)| tx.clone()))
    }

    async fn receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.txs.lock().get(&hash).map(|(_, receipt, _)| *receipt))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .txs
            .lock()
            .values()
            .find(|(_, receipt, _)| receipt.block_number == Some(block_number))
            .map(|(_, _, timestamp)| *timestamp))
    }
}

/// Indexer holding per-address history.
#[derive(Default)]
pub struct FakeIndexer {
    history: Mutex<HashMap<Address, Vec<IndexedTransaction>>>,
    /// Number of history queries.
    pub calls: AtomicUsize,
}

#[async_trait]
impl HistoryIndexer for FakeIndexer {
    async fn transactions(&self, address: &Address) -> Result<Vec<IndexedTransaction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().get(address).cloned().unwrap_or_default())
    }
}

/// A wallet able to sign agreements.
pub struct TestWallet {
    signer: PrivateKeySigner,
}

impl TestWallet {
    /// Create a random wallet.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Wallet address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Hex signature over the agreement for `nonce`.
    ///
    /// # Panics
    ///
    /// Panics if signing fails.
    #[must_use]
    pub fn sign(&self, nonce: &str) -> String {
        let sig = self
            .signer
            .sign_message_sync(agreement_message(nonce).as_bytes())
            .expect("sign agreement");
        format!("0x{}", hex::encode(sig.as_bytes()))
    }

    /// A correctly signed request.
    #[must_use]
    pub fn request(&self, nonce: &str, tx_hash: Option<B256>) -> AccessRequest {
        AccessRequest {
            address: canonical_address(&self.address()),
            signature: self.sign(nonce),
            nonce: nonce.to_string(),
            tx_hash: tx_hash.map(|h| h.to_string()),
        }
    }
}

/// Test harness that wires the gateway to in-memory upstreams.
pub struct TestHarness {
    /// Gateway under test.
    pub gateway: Arc<AccessGateway>,
    /// Registry fake.
    pub registry: Arc<FakeRegistry>,
    /// Ledger fake.
    pub chain: Arc<FakeChain>,
    /// Indexer fake.
    pub indexer: Arc<FakeIndexer>,
    next_tx: AtomicU8,
}

impl TestHarness {
    /// Create a harness with default terms: fee 0.001, refill 1000, 30 days.
    #[must_use]
    pub fn new() -> Self {
        let registry = Arc::new(FakeRegistry::default());
        let chain = Arc::new(FakeChain::default());
        let indexer = Arc::new(FakeIndexer::default());

        let components = Self::assemble(&registry, &chain, &indexer);
        Self {
            gateway: Arc::new(AccessGateway::new(components)),
            registry,
            chain,
            indexer,
            next_tx: AtomicU8::new(1),
        }
    }

    /// Terms every harness gateway enforces.
    ///
    /// # Panics
    ///
    /// Panics if the fixed terms are invalid.
    #[must_use]
    pub fn terms() -> PaymentTerms {
        PaymentTerms::new(VAULT, "0.001", 1000, 30).expect("valid terms")
    }

    fn assemble(
        registry: &Arc<FakeRegistry>,
        chain: &Arc<FakeChain>,
        indexer: &Arc<FakeIndexer>,
    ) -> GatewayComponents {
        let client = RegistryClient::new(
            Arc::clone(registry) as Arc<dyn RegistryBackend>,
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        let prover = PaymentProver::new(
            Self::terms(),
            Arc::clone(chain) as Arc<dyn TransactionSource>,
            Arc::clone(indexer) as Arc<dyn HistoryIndexer>,
            PaymentProverConfig {
                confirmation_timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(10),
                rpc_timeout: Duration::from_millis(500),
            },
        );
        GatewayComponents {
            registry: client,
            prover,
            sync_policy: SyncPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(5),
            },
            nonces: NonceGuard::default(),
            throttle: ScanThrottle::new(Duration::ZERO, 1024),
        }
    }

    /// Fresh components sharing this harness's fakes.
    #[must_use]
    pub fn components(&self) -> GatewayComponents {
        Self::assemble(&self.registry, &self.chain, &self.indexer)
    }

    /// Total calls made to the payment prover's upstreams.
    #[must_use]
    pub fn prover_calls(&self) -> usize {
        self.chain.calls.load(Ordering::SeqCst) + self.indexer.calls.load(Ordering::SeqCst)
    }

    /// Mine a transfer on the fake ledger and return its hash.
    ///
    /// # Panics
    ///
    /// Panics if `ether` is not a valid amount.
    pub fn mine_transfer(
        &self,
        from: Address,
        to: Address,
        ether: &str,
        confirmed_at: DateTime<Utc>,
        succeeded: bool,
    ) -> B256 {
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let hash = B256::repeat_byte(n);
        let tx = ObservedTransaction {
            hash,
            from,
            to: Some(to),
            value: parse_ether(ether).expect("valid amount"),
        };
        let receipt = ObservedReceipt {
            succeeded,
            block_number: Some(u64::from(n)),
        };
        let timestamp = u64::try_from(confirmed_at.timestamp()).expect("post-epoch");
        self.chain.txs.lock().insert(hash, (tx, receipt, timestamp));
        hash
    }

    /// Add an entry to the indexed history of `from`.
    ///
    /// # Panics
    ///
    /// Panics if `ether` is not a valid amount.
    pub fn index_transfer(
        &self,
        from: Address,
        to: Address,
        ether: &str,
        confirmed_at: DateTime<Utc>,
    ) -> B256 {
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let hash = B256::repeat_byte(n);
        self.indexer
            .history
            .lock()
            .entry(from)
            .or_default()
            .push(IndexedTransaction {
                hash,
                from,
                to: Some(to),
                value: parse_ether(ether).expect("valid amount"),
                timestamp: u64::try_from(confirmed_at.timestamp()).expect("post-epoch"),
                failed: false,
            });
        hash
    }

    /// Bind an HTTP service on an ephemeral port, sharing this harness's
    /// fakes, and serve it on a background task.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn serve(&self) -> ServedGateway {
        let mut config = GatewayConfig::default();
        config.server.listen = ([127, 0, 0, 1], 0).into();

        let mut running: RunningGateway = GatewayBuilder::new(config)
            .build_with(self.components())
            .await
            .expect("bind listener");
        let base_url = format!("http://{}", running.local_addr());
        let shutdown = running.shutdown_handle();
        let task = tokio::spawn(async move { running.run().await });

        ServedGateway {
            base_url,
            shutdown,
            task,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP gateway running on a background task.
pub struct ServedGateway {
    /// `http://host:port` of the service.
    pub base_url: String,
    shutdown: sourcing_gateway::ShutdownHandle,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl ServedGateway {
    /// Stop the service and wait for it to exit.
    ///
    /// # Panics
    ///
    /// Panics if the server task failed.
    pub async fn teardown(self) {
        self.shutdown.shutdown();
        self.task
            .await
            .expect("server task joined")
            .expect("server exited cleanly");
    }
}
