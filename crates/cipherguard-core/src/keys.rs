//! Key hierarchy: a root key derived from workspace credentials, and
//! per-column key sets derived from the root.
//!
//! All key material is zeroized on drop. The derivation is deterministic, so
//! a rebuilt client resolves the same key sets for the same credentials and
//! the cache never needs invalidation.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;
use crate::schema::Identifier;

/// Size of every derived key in bytes.
pub const KEY_SIZE: usize = 32;

/// Number of bytes of the key-id HMAC kept in the wire representation.
const KEY_ID_BYTES: usize = 8;

type HmacSha256 = Hmac<Sha256>;

/// Workspace credentials supplied in the constructor config.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// The workspace identifier.
    pub workspace_id: String,
    /// The access key the root key is derived from.
    pub access_key: String,
    /// The dataset identifier scoping the key hierarchy.
    pub dataset_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("workspace_id", &self.workspace_id)
            .field("access_key", &"[REDACTED]")
            .field("dataset_id", &self.dataset_id)
            .finish()
    }
}

/// The full key set for one column.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ColumnKeySet {
    /// Stable identifier of the data-encryption key, carried in envelopes.
    pub key_id: String,
    /// AEAD data-encryption key.
    pub(crate) dek: [u8; KEY_SIZE],
    /// Key for the equality blind index.
    pub(crate) blind_key: [u8; KEY_SIZE],
    /// Key for order-revealing index blocks.
    pub(crate) ore_key: [u8; KEY_SIZE],
    /// Key for match index bloom positions.
    pub(crate) match_key: [u8; KEY_SIZE],
    /// Key for deterministic nonce derivation.
    pub(crate) nonce_key: [u8; KEY_SIZE],
    /// Key for the encryption context commitment.
    pub(crate) commit_key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for ColumnKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnKeySet")
            .field("key_id", &self.key_id)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Derives column key sets from workspace credentials.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyProvider {
    root: [u8; KEY_SIZE],
}

impl KeyProvider {
    /// Derive the root key from the supplied credentials.
    pub fn new(credentials: &Credentials) -> Result<Self, Error> {
        let mut salt =
            Vec::with_capacity(credentials.workspace_id.len() + credentials.dataset_id.len() + 1);
        salt.extend_from_slice(credentials.workspace_id.as_bytes());
        salt.push(0x1f);
        salt.extend_from_slice(credentials.dataset_id.as_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), credentials.access_key.as_bytes());
        let mut root = [0u8; KEY_SIZE];
        hkdf.expand(b"cipherguard/root/v1", &mut root)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;

        Ok(Self { root })
    }

    /// Resolve the key set for one column.
    pub async fn column_keys(&self, identifier: &Identifier) -> Result<ColumnKeySet, Error> {
        let scope = column_scope(identifier);
        let hkdf = Hkdf::<Sha256>::new(Some(&scope), &self.root);

        Ok(ColumnKeySet {
            key_id: self.key_id(identifier)?,
            dek: expand(&hkdf, b"cipherguard/dek/v1")?,
            blind_key: expand(&hkdf, b"cipherguard/blind/v1")?,
            ore_key: expand(&hkdf, b"cipherguard/ore/v1")?,
            match_key: expand(&hkdf, b"cipherguard/match/v1")?,
            nonce_key: expand(&hkdf, b"cipherguard/nonce/v1")?,
            commit_key: expand(&hkdf, b"cipherguard/commit/v1")?,
        })
    }

    /// The stable key id for one column's data-encryption key.
    pub fn key_id(&self, identifier: &Identifier) -> Result<String, Error> {
        let scope = column_scope(identifier);
        let digest = hmac_sha256(&self.root, &[b"cipherguard/key-id/v1", &scope])?;
        Ok(hex::encode(&digest[..KEY_ID_BYTES]))
    }
}

/// Keyed HMAC-SHA256 over a sequence of message parts.
pub(crate) fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], Error> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Error::KeyDerivation(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn column_scope(identifier: &Identifier) -> Vec<u8> {
    let mut scope = Vec::with_capacity(identifier.table.len() + identifier.column.len() + 1);
    scope.extend_from_slice(identifier.table.as_bytes());
    scope.push(0x1f);
    scope.extend_from_slice(identifier.column.as_bytes());
    scope
}

fn expand(hkdf: &Hkdf<Sha256>, info: &[u8]) -> Result<[u8; KEY_SIZE], Error> {
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(okm)
}
