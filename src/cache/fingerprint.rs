//! Content-addressed layer fingerprints
//!
//! A fingerprint is the SHA256 of a step's inputs chained onto the
//! fingerprint of the layer below it. Same inputs on the same base = same
//! fingerprint, and any upstream change ripples into every layer above.

use crate::error::{PlinthError, PlinthResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Domain tag mixed into every layer hash
const LAYER_DOMAIN: &[u8] = b"plinth.layer.v1";

/// Number of hex characters in the short display form
const SHORT_LEN: usize = 12;

/// SHA256 fingerprint identifying a layer by its inputs
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of the empty base layer every run starts from
    pub const ZERO: Fingerprint = Fingerprint([0u8; 32]);

    /// Compute the fingerprint of a step applied on top of `previous`.
    ///
    /// Every field is length-prefixed so `("ab", "c")` and `("a", "bc")`
    /// hash differently.
    pub fn chain(previous: &Fingerprint, step_id: &str, inputs: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(LAYER_DOMAIN);
        hasher.update(previous.0);
        hasher.update((step_id.len() as u64).to_le_bytes());
        hasher.update(step_id.as_bytes());
        hasher.update((inputs.len() as u64).to_le_bytes());
        hasher.update(inputs);
        Self(hasher.finalize().into())
    }

    /// Plain SHA256 of arbitrary bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Full 64-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> String {
        self.to_hex()[..SHORT_LEN].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = PlinthError;

    fn from_str(s: &str) -> PlinthResult<Self> {
        let invalid = |reason: &str| PlinthError::FingerprintInvalid {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if s.len() != 64 {
            return Err(invalid("expected 64 hex characters"));
        }
        let bytes = hex::decode(s).map_err(|e| invalid(&e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
