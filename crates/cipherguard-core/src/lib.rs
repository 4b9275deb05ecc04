//! Searchable field-level encryption engine for the cipherguard bridge.
//!
//! This crate owns everything cryptographic: the credential-derived key
//! hierarchy and its cache, AES-256-GCM sealing with schema-driven
//! associated data, and deterministic index term generation (equality blind
//! index, order-revealing prefix blocks, bloom-filter match positions).
//!
//! The FFI bridge consumes this crate through [`DatasetCipher`] and never
//! touches key material directly.

pub mod cipher;
pub mod error;
pub mod index;
pub mod keys;
pub mod plaintext;
pub mod record;
pub mod schema;

pub use cipher::{
    DatasetCipher, PlaintextTarget, Query, QueryTerm, DEFAULT_TIMEOUT_MS, NONCE_SIZE,
    RECORD_VERSION, TAG_SIZE,
};
pub use error::Error;
pub use index::IndexTerm;
pub use keys::Credentials;
pub use record::{EncryptedRecord, EncryptionContext, COMMITMENT_SIZE};
