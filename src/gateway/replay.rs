//! Nonce replay guard and ledger-scan throttle.
//!
//! Both are bounded LRU maps local to one process. A deployment with several
//! gateway instances gets per-instance guarantees only.

use crate::payment::PaymentEvidence;
use alloy::primitives::Address;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of tracked entries.
const DEFAULT_CAPACITY: usize = 100_000;

fn capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)
}

/// Counters for monitoring the guards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GuardStats {
    /// Nonces recorded as consumed.
    pub nonces_consumed: u64,
    /// Requests rejected for presenting a consumed nonce.
    pub replays_rejected: u64,
    /// Ledger scans allowed to run.
    pub scans_allowed: u64,
    /// Ledger scans answered from the last result.
    pub scans_cached: u64,
    /// Ledger scans refused while another was still running.
    pub scans_throttled: u64,
}

/// Remembers agreement nonces that already produced a grant.
#[derive(Clone)]
pub struct NonceGuard {
    consumed: Arc<Mutex<LruCache<(Address, String), ()>>>,
    stats: Arc<Mutex<GuardStats>>,
    enabled: bool,
}

impl NonceGuard {
    /// Create a guard tracking up to `entries` nonces.
    #[must_use]
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            consumed: Arc::new(Mutex::new(LruCache::new(capacity(entries)))),
            stats: Arc::new(Mutex::new(GuardStats::default())),
            enabled: true,
        }
    }

    /// A guard that accepts every nonce.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::with_capacity(1)
        }
    }

    /// Reserve `nonce` for `address`.
    ///
    /// Checks and records under one lock, so of several concurrent requests
    /// carrying the same nonce exactly one gets the reservation. Returns
    /// false if the nonce is already taken.
    pub fn try_reserve(&self, address: &Address, nonce: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let key = (*address, nonce.to_string());
        let mut consumed = self.consumed.lock();
        if consumed.contains(&key) {
            drop(consumed);
            self.stats.lock().replays_rejected += 1;
            return false;
        }
        consumed.put(key, ());
        drop(consumed);
        self.stats.lock().nonces_consumed += 1;
        true
    }

    /// Give back a reservation whose request was denied.
    pub fn release(&self, address: &Address, nonce: &str) {
        if !self.enabled {
            return;
        }
        if self
            .consumed
            .lock()
            .pop(&(*address, nonce.to_string()))
            .is_some()
        {
            let mut stats = self.stats.lock();
            stats.nonces_consumed = stats.nonces_consumed.saturating_sub(1);
        }
    }

    /// Number of nonces currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumed.lock().len()
    }

    /// Returns true if no nonce is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumed.lock().is_empty()
    }

    /// Get current statistics.
    #[must_use]
    pub fn stats(&self) -> GuardStats {
        self.stats.lock().clone()
    }
}

impl Default for NonceGuard {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// Outcome of asking the throttle for a ledger scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPermit {
    /// Run the scan, then report it with [`ScanThrottle::record`].
    Run,
    /// A scan ran within the interval; reuse what it found.
    Cached(Option<PaymentEvidence>),
    /// A scan started within the interval has not reported yet.
    Pending {
        /// Time until a new scan is allowed.
        retry_after: Duration,
    },
}

#[derive(Debug, Clone)]
struct ScanEntry {
    started: Instant,
    found: Option<Option<PaymentEvidence>>,
}

/// Limits ledger scans to one per address per interval.
///
/// Within the interval the last scan result is served from memory, so an
/// identity that has just paid keeps its grant while the registry write
/// is still in flight.
#[derive(Clone)]
pub struct ScanThrottle {
    scans: Arc<Mutex<LruCache<Address, ScanEntry>>>,
    stats: Arc<Mutex<GuardStats>>,
    interval: Duration,
}

impl ScanThrottle {
    /// Create a throttle. A zero interval never throttles.
    #[must_use]
    pub fn new(interval: Duration, entries: usize) -> Self {
        Self {
            scans: Arc::new(Mutex::new(LruCache::new(capacity(entries)))),
            stats: Arc::new(Mutex::new(GuardStats::default())),
            interval,
        }
    }

    /// Minimum time between two scans of one address.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ask to scan the history of `address`.
    pub fn try_acquire(&self, address: &Address) -> ScanPermit {
        let now = Instant::now();
        let mut scans = self.scans.lock();

        if let Some(entry) = scans.get(address) {
            let elapsed = now.saturating_duration_since(entry.started);
            if elapsed < self.interval {
                let permit = match &entry.found {
                    Some(found) => ScanPermit::Cached(found.clone()),
                    None => ScanPermit::Pending {
                        retry_after: self.interval - elapsed,
                    },
                };
                drop(scans);
                let mut stats = self.stats.lock();
                match permit {
                    ScanPermit::Cached(_) => stats.scans_cached += 1,
                    _ => stats.scans_throttled += 1,
                }
                return permit;
            }
        }

        scans.put(
            *address,
            ScanEntry {
                started: now,
                found: None,
            },
        );
        drop(scans);
        self.stats.lock().scans_allowed += 1;
        ScanPermit::Run
    }

    /// Remember what the scan started by [`Self::try_acquire`] found.
    ///
    /// A scan that failed is never recorded, so later requests see it as
    /// pending until the interval has passed.
    pub fn record(&self, address: &Address, found: Option<PaymentEvidence>) {
        if let Some(entry) = self.scans.lock().get_mut(address) {
            entry.found = Some(found);
        }
    }

    /// Get current statistics.
    #[must_use]
    pub fn stats(&self) -> GuardStats {
        self.stats.lock().clone()
    }
}

impl Default for ScanThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), DEFAULT_CAPACITY)
    }
}
