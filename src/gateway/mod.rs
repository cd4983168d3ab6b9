//! Tiered access decisions for metered sourcing operations.
//!
//! # Architecture
//!
//! ```text
//! verify request
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Recover signer      │── mismatch ──▶ 401
//! └─────────┬───────────┘
//!           ▼
//!   Tier 1: registry ──── active ──▶ GRANTED (no write)
//!           │
//!      expired / absent / unavailable
//!           │
//!     txHash supplied? ── yes ──▶ Tier 2: direct lookup
//!           │                       │            │
//!           no                    miss        evidence
//!           │◀──────────────────────┘            │
//!           ▼                                    │
//!   Tier 3: history scan ── evidence ────────────┤
//!           │                                    ▼
//!          miss                      Tier 4: schedule write-back
//!           │                                    │
//!           ▼                                    ▼
//!        DENIED (402 + fulfillment)           GRANTED
//! ```
//!
//! Escalation is strictly sequential; every tier failure is a miss that
//! moves on to the next tier. Only identity failures end a request early.

mod replay;
mod sync;

pub use replay::{GuardStats, NonceGuard, ScanPermit, ScanThrottle};
pub use sync::{SyncHandle, SyncPolicy, Synchronizer};

use crate::error::{Error, Result};
use crate::event::{
    create_event_channel, GatewayEvent, GatewayEventsChannel, GatewayEventsSender, Tier,
};
use crate::identity::{self, canonical_address, parse_address};
use crate::payment::{Fulfillment, PaymentEvidence, PaymentProver, PaymentTerms};
use crate::registry::{AccessRecord, RegistryClient};
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A caller's claim to access, as received from the wallet flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Claimed identity.
    pub address: String,
    /// Hex signature over the agreement message.
    pub signature: String,
    /// Nonce embedded in the agreement message.
    pub nonce: String,
    /// Payment transaction the caller just sent, if any.
    pub tx_hash: Option<String>,
}

/// What justified a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantBasis {
    /// An unexpired registry record.
    Registry,
    /// A freshly verified payment.
    Payment {
        /// Payment transaction hash.
        tx_hash: B256,
    },
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No active subscription and no qualifying payment.
    NoPayment,
    /// No qualifying payment, and the registry could not be read, so the
    /// reported capital is unknown rather than zero.
    CapitalUnknown,
    /// A history scan of this identity is still running.
    ScanThrottled {
        /// Time until a new scan is allowed.
        retry_after: Duration,
    },
}

/// Terminal outcome of the escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The identity may consume metered operations.
    Granted {
        /// Subscription end.
        expires_on: DateTime<Utc>,
        /// Remaining capital.
        capital: u64,
        /// What justified the grant.
        basis: GrantBasis,
    },
    /// The identity must pay first.
    Denied {
        /// Capital currently on file, zero when it could not be read.
        capital: u64,
        /// Why access was denied.
        reason: DenialReason,
        /// Payment instructions, when paying would help.
        fulfillment: Option<Fulfillment>,
    },
}

impl Decision {
    /// Returns true if access was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    /// Capital reported with the decision.
    #[must_use]
    pub fn capital(&self) -> u64 {
        match self {
            Self::Granted { capital, .. } | Self::Denied { capital, .. } => *capital,
        }
    }

    /// Human-readable explanation of a denial.
    #[must_use]
    pub fn denial_message(&self) -> Option<String> {
        match self {
            Self::Granted { .. } => None,
            Self::Denied {
                reason: DenialReason::NoPayment,
                ..
            } => Some("No active subscription or qualifying payment found".to_string()),
            Self::Denied {
                reason: DenialReason::CapitalUnknown,
                ..
            } => Some(
                "No qualifying payment found and the registry could not be read, \
                 capital on file is unknown"
                    .to_string(),
            ),
            Self::Denied {
                reason: DenialReason::ScanThrottled { retry_after },
                ..
            } => Some(format!(
                "Payment history check already in progress, retry in {}s",
                retry_after.as_secs().max(1)
            )),
        }
    }
}

/// Decision plus the write-back it scheduled, if any.
#[derive(Debug)]
pub struct AccessOutcome {
    /// The access decision.
    pub decision: Decision,
    /// Registry write-back running in the background.
    pub sync: Option<SyncHandle>,
}

/// Escalation state. Each variant is one tier; `Finished` is terminal.
#[derive(Debug)]
enum Stage {
    RegistryCheck,
    HashCheck {
        tx_hash: B256,
        capital: Option<u64>,
    },
    LedgerScan {
        capital: Option<u64>,
    },
    SyncWrite {
        evidence: PaymentEvidence,
        expires_on: DateTime<Utc>,
    },
    Finished(Decision),
}

/// Collaborators the gateway is assembled from.
pub struct GatewayComponents {
    /// Registry client for Tier 1 and write-back.
    pub registry: RegistryClient,
    /// Payment prover for Tiers 2 and 3.
    pub prover: PaymentProver,
    /// Retry policy for write-back.
    pub sync_policy: SyncPolicy,
    /// Nonce replay guard.
    pub nonces: NonceGuard,
    /// Ledger-scan throttle.
    pub throttle: ScanThrottle,
}

/// The access gateway.
pub struct AccessGateway {
    registry: RegistryClient,
    prover: PaymentProver,
    synchronizer: Synchronizer,
    nonces: NonceGuard,
    throttle: ScanThrottle,
    events: GatewayEventsSender,
}

impl AccessGateway {
    /// Assemble a gateway.
    #[must_use]
    pub fn new(components: GatewayComponents) -> Self {
        let (events, _) = create_event_channel();
        let synchronizer = Synchronizer::new(
            components.registry.clone(),
            components.sync_policy,
            events.clone(),
        );

        info!(
            vault = %canonical_address(&components.prover.terms().vault),
            fee = %components.prover.terms().fee_display(),
            refill = components.prover.terms().refill_tokens,
            "Access gateway initialized"
        );

        Self {
            registry: components.registry,
            prover: components.prover,
            synchronizer,
            nonces: components.nonces,
            throttle: components.throttle,
            events,
        }
    }

    /// Subscription terms in force.
    #[must_use]
    pub fn terms(&self) -> &PaymentTerms {
        self.prover.terms()
    }

    /// Subscribe to gateway events.
    #[must_use]
    pub fn subscribe_events(&self) -> GatewayEventsChannel {
        self.events.subscribe()
    }

    /// Replay guard statistics.
    #[must_use]
    pub fn nonce_stats(&self) -> GuardStats {
        self.nonces.stats()
    }

    /// Decide access for a signed request, escalating through every tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for malformed input and an identity
    /// error ([`Error::IdentityMismatch`], [`Error::MalformedSignature`],
    /// [`Error::NonceReused`]) if the proof is rejected. Upstream failures
    /// never surface here; they only make a tier miss.
    pub async fn verify(&self, request: &AccessRequest) -> Result<AccessOutcome> {
        let claimed = parse_address(&request.address)?;
        if request.nonce.trim().is_empty() {
            return Err(Error::InvalidRequest("nonce is required".to_string()));
        }
        let tx_hash = request
            .tx_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
            .map(parse_tx_hash)
            .transpose()?;

        let address = identity::verify(&claimed, &request.nonce, &request.signature)?;
        if !self.nonces.try_reserve(&address, &request.nonce) {
            warn!(address = %canonical_address(&address), "Rejected replayed agreement nonce");
            return Err(Error::NonceReused);
        }

        let outcome = self.escalate(address, tx_hash).await;

        // Only a grant consumes the nonce; a denied caller may retry after paying.
        if !outcome.decision.is_granted() {
            self.nonces.release(&address, &request.nonce);
        }
        self.publish_decision(&address, &outcome.decision);

        Ok(outcome)
    }

    /// Tier 1 only: report current entitlement without any proof.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a malformed address and registry
    /// errors unchanged, since there is no further tier to fall back on.
    pub async fn status(&self, address: &str) -> Result<Decision> {
        let address = parse_address(address)?;
        let record = self.registry.lookup(&address).await?;

        Ok(match active_expiry(&record, Utc::now()) {
            Some(expires_on) => Decision::Granted {
                expires_on,
                capital: record.capital,
                basis: GrantBasis::Registry,
            },
            None => self.denial(Some(record.capital)),
        })
    }

    async fn escalate(&self, address: Address, tx_hash: Option<B256>) -> AccessOutcome {
        let now = Utc::now();
        let mut sync = None;
        let mut stage = Stage::RegistryCheck;

        let decision = loop {
            debug!(address = %canonical_address(&address), ?stage, "Escalation step");
            stage = match stage {
                Stage::RegistryCheck => self.registry_check(&address, tx_hash, now).await,
                Stage::HashCheck { tx_hash, capital } => {
                    self.hash_check(&address, tx_hash, capital, now).await
                }
                Stage::LedgerScan { capital } => self.ledger_scan(&address, capital, now).await,
                Stage::SyncWrite {
                    evidence,
                    expires_on,
                } => {
                    let (next, handle) = self.sync_write(&address, &evidence, expires_on);
                    sync = Some(handle);
                    next
                }
                Stage::Finished(decision) => break decision,
            };
        };

        AccessOutcome { decision, sync }
    }

    async fn registry_check(
        &self,
        address: &Address,
        tx_hash: Option<B256>,
        now: DateTime<Utc>,
    ) -> Stage {
        let capital = match self.registry.lookup(address).await {
            Ok(record) => {
                if let Some(expires_on) = active_expiry(&record, now) {
                    debug!(address = %canonical_address(address), "Registry record active");
                    return Stage::Finished(Decision::Granted {
                        expires_on,
                        capital: record.capital,
                        basis: GrantBasis::Registry,
                    });
                }
                self.tier_miss(address, Tier::Registry, "no active subscription on record");
                Some(record.capital)
            }
            Err(e) => {
                // An outage must not deny a caller who has in fact paid.
                self.tier_miss(address, Tier::Registry, &e.to_string());
                None
            }
        };

        match tx_hash {
            Some(tx_hash) => Stage::HashCheck { tx_hash, capital },
            None => Stage::LedgerScan { capital },
        }
    }

    async fn hash_check(
        &self,
        address: &Address,
        tx_hash: B256,
        capital: Option<u64>,
        now: DateTime<Utc>,
    ) -> Stage {
        match self.prover.verify_by_reference(address, tx_hash).await {
            Ok(Some(evidence)) => match self.fresh(evidence, now) {
                Ok((evidence, expires_on)) => {
                    return Stage::SyncWrite {
                        evidence,
                        expires_on,
                    }
                }
                Err(reason) => self.tier_miss(address, Tier::Reference, &reason),
            },
            Ok(None) => {
                let miss = Error::PaymentNotFound(format!("{tx_hash} is not a qualifying payment"));
                self.tier_miss(address, Tier::Reference, &miss.to_string());
            }
            Err(e) => self.tier_miss(address, Tier::Reference, &e.to_string()),
        }
        Stage::LedgerScan { capital }
    }

    async fn ledger_scan(
        &self,
        address: &Address,
        capital: Option<u64>,
        now: DateTime<Utc>,
    ) -> Stage {
        let found = match self.throttle.try_acquire(address) {
            ScanPermit::Run => match self.prover.scan_history(address).await {
                Ok(found) => {
                    self.throttle.record(address, found.clone());
                    found
                }
                Err(e) => {
                    self.tier_miss(address, Tier::LedgerScan, &e.to_string());
                    return Stage::Finished(self.denial(capital));
                }
            },
            ScanPermit::Cached(found) => {
                debug!(address = %canonical_address(address), "Reusing recent history scan");
                found
            }
            ScanPermit::Pending { retry_after } => {
                self.tier_miss(address, Tier::LedgerScan, "scan already in progress");
                return Stage::Finished(Decision::Denied {
                    capital: capital.unwrap_or_default(),
                    reason: DenialReason::ScanThrottled { retry_after },
                    fulfillment: None,
                });
            }
        };

        match found {
            Some(evidence) => match self.fresh(evidence, now) {
                Ok((evidence, expires_on)) => {
                    return Stage::SyncWrite {
                        evidence,
                        expires_on,
                    }
                }
                Err(reason) => self.tier_miss(address, Tier::LedgerScan, &reason),
            },
            None => {
                let miss = Error::PaymentNotFound("no qualifying payment in history".to_string());
                self.tier_miss(address, Tier::LedgerScan, &miss.to_string());
            }
        }
        Stage::Finished(self.denial(capital))
    }

    fn sync_write(
        &self,
        address: &Address,
        evidence: &PaymentEvidence,
        expires_on: DateTime<Utc>,
    ) -> (Stage, SyncHandle) {
        let record = AccessRecord::new(expires_on, self.terms().refill_tokens);

        let _ = self.events.send(GatewayEvent::PaymentAccepted {
            address: canonical_address(address),
            tx_hash: evidence.tx_hash.to_string(),
        });

        let handle = self.synchronizer.schedule(*address, record);

        // The confirmed payment is authoritative; the write only refreshes
        // the registry and its outcome does not change this decision.
        let decision = Decision::Granted {
            expires_on,
            capital: record.capital,
            basis: GrantBasis::Payment {
                tx_hash: evidence.tx_hash,
            },
        };
        (Stage::Finished(decision), handle)
    }

    /// Reject evidence whose subscription window has already closed or
    /// cannot be represented.
    fn fresh(
        &self,
        evidence: PaymentEvidence,
        now: DateTime<Utc>,
    ) -> std::result::Result<(PaymentEvidence, DateTime<Utc>), String> {
        match self.terms().expiry_from(evidence.confirmed_at) {
            Some(expiry) if expiry > now => Ok((evidence, expiry)),
            Some(expiry) => Err(format!(
                "latest payment {} expired on {expiry}",
                evidence.tx_hash
            )),
            None => Err(format!(
                "payment {} has an out of range confirmation time {}",
                evidence.tx_hash, evidence.confirmed_at
            )),
        }
    }

    /// Denial with payment instructions. `None` capital means Tier 1 failed.
    fn denial(&self, capital: Option<u64>) -> Decision {
        Decision::Denied {
            capital: capital.unwrap_or_default(),
            reason: if capital.is_some() {
                DenialReason::NoPayment
            } else {
                DenialReason::CapitalUnknown
            },
            fulfillment: Some(self.terms().fulfillment()),
        }
    }
    fn tier_miss(&self, address: &Address, tier: Tier, reason: &str) {
        debug!(address = %canonical_address(address), ?tier, "Tier miss: {reason}");
        let _ = self.events.send(GatewayEvent::TierMiss {
            address: canonical_address(address),
            tier,
            reason: reason.to_string(),
        });
    }

    fn publish_decision(&self, address: &Address, decision: &Decision) {
        let address = canonical_address(address);
        match decision {
            Decision::Granted { basis, .. } => {
                info!(%address, ?basis, "Access granted");
                let _ = self.events.send(GatewayEvent::AccessGranted {
                    address,
                    via_payment: matches!(basis, GrantBasis::Payment { .. }),
                });
            }
            Decision::Denied { reason, .. } => {
                info!(%address, ?reason, "Access denied");
                let _ = self.events.send(GatewayEvent::AccessDenied { address });
            }
        }
    }
}

fn active_expiry(record: &AccessRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    record.expires_on.filter(|_| record.is_active_at(now))
}

fn parse_tx_hash(text: &str) -> Result<B256> {
    B256::from_str(text)
        .map_err(|e| Error::InvalidRequest(format!("invalid transaction hash '{text}': {e}")))
}
