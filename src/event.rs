//! Gateway event system.

use tokio::sync::broadcast;

/// Escalation tier that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Tier 1: registry lookup.
    Registry,
    /// Tier 2: direct transaction lookup.
    Reference,
    /// Tier 3: indexer history scan.
    LedgerScan,
}

/// Events emitted by the gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Access granted.
    AccessGranted {
        /// Identity that was granted.
        address: String,
        /// True if a fresh payment (rather than the registry) justified it.
        via_payment: bool,
    },

    /// Access denied.
    AccessDenied {
        /// Identity that was denied.
        address: String,
    },

    /// A tier did not resolve the request and escalation continued.
    TierMiss {
        /// Identity being checked.
        address: String,
        /// Tier that missed.
        tier: Tier,
        /// Why it missed.
        reason: String,
    },

    /// A qualifying payment was accepted.
    PaymentAccepted {
        /// Paying identity.
        address: String,
        /// Payment transaction hash.
        tx_hash: String,
    },

    /// The registry write-back was confirmed.
    SyncCompleted {
        /// Identity whose record was written.
        address: String,
        /// Write transaction hash.
        tx_hash: String,
    },

    /// The registry write-back failed after all retries and awaits
    /// reconciliation on the identity's next request.
    SyncFailed {
        /// Identity whose record was not written.
        address: String,
        /// Error message.
        message: String,
    },
}

/// Channel for receiving gateway events.
pub type GatewayEventsChannel = broadcast::Receiver<GatewayEvent>;

/// Sender for gateway events.
pub type GatewayEventsSender = broadcast::Sender<GatewayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (GatewayEventsSender, GatewayEventsChannel) {
    broadcast::channel(256)
}
