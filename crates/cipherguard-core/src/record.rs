//! Encrypted records and encryption contexts.
//!
//! A record is the AEAD output plus the key identifier and the context
//! commitment. The commitment is what lets decryption distinguish a wrong
//! context from a corrupted ciphertext: AEAD verification alone reports both
//! as the same failure.

use std::collections::BTreeMap;

use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::keys::{hmac_sha256, ColumnKeySet};

/// Size of the context commitment in bytes.
pub const COMMITMENT_SIZE: usize = 32;

/// Per-record associated data bound into the AEAD.
///
/// Keys are kept sorted so the canonical serialization is stable regardless
/// of the order the host supplied them in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncryptionContext(BTreeMap<String, serde_json::Value>);

impl EncryptionContext {
    /// The empty context. Equivalent to an absent or `null` context value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a context from a JSON value: an object, or `null` for empty.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Null => Ok(Self::empty()),
            serde_json::Value::Object(map) => Ok(Self(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            other => Err(Error::InvalidContext(format!(
                "expected a JSON object or `null`, got `{other}`"
            ))),
        }
    }

    /// Whether the context carries no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical serialization with sorted keys.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&self.0).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// The keyed commitment bound into every record encrypted under this
    /// context.
    pub fn commitment(&self, keys: &ColumnKeySet) -> Result<[u8; COMMITMENT_SIZE], Error> {
        let canonical = self.canonical_bytes()?;
        hmac_sha256(&keys.commit_key, &[b"cipherguard/ctx/v1", &canonical])
    }
}

/// One encrypted value as produced by the cipher, before envelope assembly.
#[derive(Clone, Debug)]
pub struct EncryptedRecord {
    /// Identifier of the data-encryption key that sealed this record.
    pub key_id: String,
    /// Nonce, ciphertext, and AEAD tag, concatenated.
    pub ciphertext: Vec<u8>,
    /// Commitment to the encryption context.
    pub context_tag: [u8; COMMITMENT_SIZE],
}

/// Constant-time commitment comparison.
pub fn commitment_matches(a: &[u8; COMMITMENT_SIZE], b: &[u8; COMMITMENT_SIZE]) -> bool {
    bool::from(a.ct_eq(b))
}
