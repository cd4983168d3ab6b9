//! Error types for sourcing-gateway.

use alloy::primitives::Address;
use thiserror::Error;

/// Result type alias using the gateway's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while deciding access for an identity.
#[derive(Debug, Error)]
pub enum Error {
    /// The signature recovers to a different address than the one claimed.
    #[error("identity mismatch: claimed {claimed}, signature recovers {recovered}")]
    IdentityMismatch {
        /// Address supplied by the caller.
        claimed: Address,
        /// Address recovered from the signature.
        recovered: Address,
    },

    /// The signature could not be decoded or recovery failed.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The agreement nonce was already used for a granted request.
    #[error("nonce already consumed for this identity")]
    NonceReused,

    /// The request itself is not well formed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The registry contract could not be reached or read.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The registry returned a document that is not a JSON object.
    #[error("registry document corrupt: {0}")]
    RegistryCorrupt(String),

    /// No qualifying payment was found.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// The registry write-back was rejected or reverted.
    #[error("registry write failed: {0}")]
    WriteFailed(String),

    /// An upstream call did not complete in time.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// An indexer or RPC call failed for a reason other than a timeout.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code used when this error terminates a request.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::IdentityMismatch { .. } | Self::MalformedSignature(_) | Self::NonceReused => 401,
            Self::InvalidRequest(_) => 400,
            Self::PaymentNotFound(_) => 402,
            Self::RegistryUnavailable(_)
            | Self::RegistryCorrupt(_)
            | Self::WriteFailed(_)
            | Self::UpstreamTimeout(_)
            | Self::Upstream(_)
            | Self::Config(_)
            | Self::Io(_) => 500,
        }
    }

    /// Whether the failure is transient and the same call may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RegistryUnavailable(_)
                | Self::RegistryCorrupt(_)
                | Self::WriteFailed(_)
                | Self::UpstreamTimeout(_)
                | Self::Upstream(_)
        )
    }

    /// Whether this error rejects the caller's identity proof.
    #[must_use]
    pub fn is_identity_failure(&self) -> bool {
        matches!(
            self,
            Self::IdentityMismatch { .. } | Self::MalformedSignature(_) | Self::NonceReused
        )
    }
}
