//! Identity verification for wallet-signed agreements.
//!
//! The wallet signs a fixed agreement text with the caller's nonce embedded.
//! Recovery uses the EIP-191 personal-message scheme, so the text here must be
//! byte-identical to what the wallet connection flow asks the user to sign.

use crate::error::{Error, Result};
use alloy::primitives::{Address, Signature};
use std::str::FromStr;
use tracing::debug;

/// Length of an `r || s || v` signature in bytes.
pub const SIGNATURE_LEN: usize = 65;

/// Agreement text shown to the wallet, with `{nonce}` substituted.
const AGREEMENT_TEMPLATE: &str = "Welcome to BOM Sourcing!\n\n\
By signing this message you accept the Terms of Service and confirm that you \
control this wallet.\n\n\
Signing is free and does not send a blockchain transaction.\n\n\
Nonce: {nonce}";

/// Build the canonical agreement message for a nonce.
#[must_use]
pub fn agreement_message(nonce: &str) -> String {
    AGREEMENT_TEMPLATE.replace("{nonce}", nonce)
}

/// Parse a hex address, accepting any letter case with or without `0x`.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] if the text is not a 20-byte hex address.
pub fn parse_address(text: &str) -> Result<Address> {
    Address::from_str(text.trim())
        .map_err(|e| Error::InvalidRequest(format!("invalid address '{text}': {e}")))
}

/// Lower-case `0x`-prefixed form used as the canonical identity key.
#[must_use]
pub fn canonical_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Recover the address that signed the agreement for `nonce`.
///
/// # Errors
///
/// Returns [`Error::MalformedSignature`] if the signature is not valid hex,
/// has the wrong length, or recovery fails.
pub fn recover_signer(nonce: &str, signature: &str) -> Result<Address> {
    let raw = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| Error::MalformedSignature(format!("signature is not hex: {e}")))?;

    if raw.len() != SIGNATURE_LEN {
        return Err(Error::MalformedSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            raw.len()
        )));
    }

    let sig = Signature::from_raw(&raw)
        .map_err(|e| Error::MalformedSignature(format!("invalid signature encoding: {e}")))?;

    sig.recover_address_from_msg(agreement_message(nonce).as_bytes())
        .map_err(|e| Error::MalformedSignature(format!("recovery failed: {e}")))
}

/// Verify that `signature` over the agreement for `nonce` was produced by
/// `claimed`.
///
/// # Errors
///
/// Returns [`Error::MalformedSignature`] if recovery fails and
/// [`Error::IdentityMismatch`] if a different key signed the message.
pub fn verify(claimed: &Address, nonce: &str, signature: &str) -> Result<Address> {
    let recovered = recover_signer(nonce, signature)?;

    // Address equality is on bytes, so hex letter case never matters here.
    if recovered != *claimed {
        debug!(
            claimed = %canonical_address(claimed),
            recovered = %canonical_address(&recovered),
            "Agreement signature belongs to a different identity"
        );
        return Err(Error::IdentityMismatch {
            claimed: *claimed,
            recovered,
        });
    }

    Ok(recovered)
}
