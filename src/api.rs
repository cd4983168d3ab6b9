//! Wire types for the verify and status calls.
//!
//! Every response carries a `status` field equal to its HTTP status code.

use crate::error::Error;
use crate::gateway::{AccessRequest, Decision};
use crate::payment::Fulfillment;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Claimed identity.
    pub address: String,
    /// Signature over the agreement message.
    pub signature: String,
    /// Agreement nonce.
    pub nonce: String,
    /// Payment transaction just sent by the caller.
    #[serde(rename = "txHash", default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl From<VerifyRequest> for AccessRequest {
    fn from(req: VerifyRequest) -> Self {
        Self {
            address: req.address,
            signature: req.signature,
            nonce: req.nonce,
            tx_hash: req.tx_hash,
        }
    }
}

/// Response to a verify or status call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifyResponse {
    /// Access granted.
    Granted {
        /// Always 200.
        status: u16,
        /// Subscription end, RFC 3339.
        expiration: String,
        /// Remaining capital.
        tokens: String,
    },
    /// Payment required.
    Denied {
        /// Always 402.
        status: u16,
        /// Explanation.
        message: String,
        /// Capital currently on file.
        tokens: String,
        /// Where and how much to pay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fulfillment: Option<Fulfillment>,
    },
    /// Request rejected or failed.
    Error {
        /// 400, 401 or 500.
        status: u16,
        /// Explanation.
        message: String,
    },
}

impl VerifyResponse {
    /// HTTP status code of this response.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Granted { status, .. }
            | Self::Denied { status, .. }
            | Self::Error { status, .. } => *status,
        }
    }

    /// A 400 response for a body that could not be decoded.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Error {
            status: 400,
            message: message.into(),
        }
    }
}

impl From<&Decision> for VerifyResponse {
    fn from(decision: &Decision) -> Self {
        match decision {
            Decision::Granted {
                expires_on,
                capital,
                ..
            } => Self::Granted {
                status: 200,
                expiration: expires_on.to_rfc3339_opts(SecondsFormat::Millis, true),
                tokens: capital.to_string(),
            },
            Decision::Denied {
                capital,
                fulfillment,
                ..
            } => Self::Denied {
                status: 402,
                message: decision.denial_message().unwrap_or_default(),
                tokens: capital.to_string(),
                fulfillment: fulfillment.clone(),
            },
        }
    }
}

impl From<&Error> for VerifyResponse {
    fn from(error: &Error) -> Self {
        Self::Error {
            status: error.status_code(),
            message: error.to_string(),
        }
    }
}
