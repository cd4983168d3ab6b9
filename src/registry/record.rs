//! Typed view over the flat registry document.
//!
//! The registry contract only stores string pairs, so each identity occupies
//! two keys: `<address>` holds the expiry and `<address>_tokens` the capital.
//! This file is the only place that knows about that layout.

use crate::error::{Error, Result};
use crate::identity::canonical_address;
use alloy::primitives::Address;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Suffix appended to an address to form its capital key.
const CAPITAL_SUFFIX: &str = "_tokens";

/// Subscription state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessRecord {
    /// End of the subscription, if one was ever recorded.
    pub expires_on: Option<DateTime<Utc>>,
    /// Remaining metered units.
    pub capital: u64,
}

impl AccessRecord {
    /// Create a record with a known expiry.
    #[must_use]
    pub fn new(expires_on: DateTime<Utc>, capital: u64) -> Self {
        Self {
            expires_on: Some(expires_on),
            capital,
        }
    }

    /// Returns true if the subscription is valid strictly after `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|expiry| expiry > now)
    }

    /// Encode into the parallel key/value arrays the registry contract takes.
    #[must_use]
    pub fn to_entries(&self, address: &Address) -> (Vec<String>, Vec<String>) {
        let expiry = self
            .expires_on
            .map(|e| e.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        (
            vec![expiry_key(address), capital_key(address)],
            vec![expiry, self.capital.to_string()],
        )
    }
}

/// Registry key holding an identity's expiry.
#[must_use]
pub fn expiry_key(address: &Address) -> String {
    canonical_address(address)
}

/// Registry key holding an identity's capital.
#[must_use]
pub fn capital_key(address: &Address) -> String {
    format!("{}{CAPITAL_SUFFIX}", canonical_address(address))
}

/// Parsed registry document.
///
/// Keys are normalised to lower case on parse so lookups never depend on how
/// a writer cased the address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDocument {
    entries: BTreeMap<String, String>,
}

impl RegistryDocument {
    /// Parse the raw JSON text returned by the registry.
    ///
    /// An empty payload is a registry that has never been written to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryCorrupt`] if the text is not a JSON object.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::RegistryCorrupt(format!("invalid JSON: {e}")))?;

        let Value::Object(map) = value else {
            return Err(Error::RegistryCorrupt(
                "document is not a JSON object".to_string(),
            ));
        };

        Ok(Self::from_map(map))
    }

    fn from_map(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Null => return None,
                    other => {
                        warn!("Skipping non-scalar registry value for key {key}: {other}");
                        return None;
                    }
                };
                Some((key.to_ascii_lowercase(), text))
            })
            .collect();
        Self { entries }
    }

    /// Raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Number of raw keys in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was ever written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Typed record for `address`. Missing or unreadable keys read as
    /// expired and zero capital.
    #[must_use]
    pub fn record_for(&self, address: &Address) -> AccessRecord {
        let expires_on = self.get(&expiry_key(address)).and_then(|raw| {
            let parsed = parse_expiry(raw);
            if parsed.is_none() && !raw.is_empty() {
                warn!(
                    address = %canonical_address(address),
                    "Unreadable expiry in registry: {raw:?}"
                );
            }
            parsed
        });

        let capital = self
            .get(&capital_key(address))
            .map_or(0, |raw| match raw.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(
                        address = %canonical_address(address),
                        "Unreadable capital in registry: {raw:?}"
                    );
                    0
                }
            });

        AccessRecord {
            expires_on,
            capital,
        }
    }
}

/// Parse an expiry as RFC 3339, or as a bare date meaning midnight UTC.
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
