//! The dataset cipher: AEAD sealing and opening with schema-driven index
//! terms, backed by a cached per-column key hierarchy.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::Error;
use crate::index::{self, IndexTerm};
use crate::keys::{hmac_sha256, ColumnKeySet, Credentials, KeyProvider};
use crate::plaintext::Plaintext;
use crate::record::{commitment_matches, EncryptedRecord, EncryptionContext, COMMITMENT_SIZE};
use crate::schema::{CastAs, ColumnConfig, EncryptionMode, Identifier, IndexType};

/// Version tag carried by every ciphertext envelope and bound into the AEAD.
pub const RECORD_VERSION: u16 = 1;

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Default bound on key resolution when the config does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// One value staged for encryption.
pub struct PlaintextTarget {
    /// The typed plaintext.
    pub plaintext: Plaintext,
    /// The column it belongs to.
    pub identifier: Identifier,
    /// The column's configuration.
    pub config: ColumnConfig,
    /// Per-record associated data.
    pub context: EncryptionContext,
}

impl PlaintextTarget {
    /// Stage a plaintext for encryption under a column configuration.
    pub fn new(
        plaintext: Plaintext,
        identifier: Identifier,
        config: ColumnConfig,
        context: EncryptionContext,
    ) -> Self {
        Self {
            plaintext,
            identifier,
            config,
            context,
        }
    }
}

/// A query predicate against one column.
pub enum Query {
    /// Exact equality against the blind index.
    Eq(Plaintext),
    /// Range comparison against the order index. At least one bound is set.
    Range {
        /// Inclusive lower bound.
        min: Option<Plaintext>,
        /// Inclusive upper bound.
        max: Option<Plaintext>,
    },
    /// Full-text match against the bloom index.
    Match(String),
}

/// The index material a server-side comparator needs to evaluate one query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryTerm {
    /// Blind index digest for equality.
    Equality(Vec<u8>),
    /// ORE blocks for each present bound.
    RangeBounds {
        /// Blocks for the lower bound.
        min: Option<Vec<Vec<u8>>>,
        /// Blocks for the upper bound.
        max: Option<Vec<Vec<u8>>>,
    },
    /// Bloom bit positions for the match tokens.
    MatchTokens(Vec<u16>),
}

/// A ready-to-use cipher scoped to one dataset's key hierarchy.
///
/// Cheap to share behind an [`Arc`]; all operations take `&self` and are
/// safe to call concurrently. Column key sets are derived once and cached
/// behind an [`RwLock`].
pub struct DatasetCipher {
    provider: KeyProvider,
    cache: RwLock<HashMap<Identifier, Arc<ColumnKeySet>>>,
    timeout: Duration,
}

impl DatasetCipher {
    /// Initialize the cipher and probe the key hierarchy.
    ///
    /// The probe derives a throwaway key set under the configured timeout so
    /// a misconfigured credential set fails here rather than on the first
    /// operation.
    pub async fn init(credentials: Credentials, timeout: Duration) -> Result<Self, Error> {
        let provider = KeyProvider::new(&credentials)?;
        let cipher = Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            timeout,
        };

        let probe = Identifier::new("__cipherguard__", "__probe__");
        cipher.resolve_keys(&probe).await?;
        cipher
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&probe);

        debug!(
            workspace_id = %credentials.workspace_id,
            dataset_id = %credentials.dataset_id,
            timeout_ms = timeout.as_millis() as u64,
            "dataset cipher ready"
        );

        Ok(cipher)
    }

    /// Encrypt one staged plaintext, returning the sealed record and the
    /// index terms its column configuration requires.
    pub async fn encrypt(
        &self,
        target: PlaintextTarget,
    ) -> Result<(EncryptedRecord, Vec<IndexTerm>), Error> {
        let keys = self.resolve_keys(&target.identifier).await?;

        let terms = index::terms_for_column(&keys, &target.config, &target.plaintext)?;
        let context_tag = target.context.commitment(&keys)?;
        let message = target.plaintext.storage_string()?;
        let aad = build_aad(
            &target.identifier,
            target.config.cast_as,
            &context_tag,
            &terms,
        );

        let nonce = match target.config.mode {
            EncryptionMode::Randomized => random_nonce(),
            EncryptionMode::Deterministic => {
                derived_nonce(&keys, &context_tag, message.as_bytes())?
            }
        };

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&keys.dek));
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: message.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Aead("seal failed".to_string()))?;

        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);

        Ok((
            EncryptedRecord {
                key_id: keys.key_id.clone(),
                ciphertext,
                context_tag,
            },
            terms,
        ))
    }

    /// Open one record, verifying the context commitment and the AEAD
    /// binding over the column identity, cast, and stored index terms.
    pub async fn decrypt(
        &self,
        record: EncryptedRecord,
        identifier: &Identifier,
        cast_as: CastAs,
        terms: &[IndexTerm],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, Error> {
        let keys = self.resolve_keys(identifier).await?;

        if record.key_id != keys.key_id {
            return Err(Error::UnknownKey(record.key_id));
        }

        let expected_tag = context.commitment(&keys)?;
        if !commitment_matches(&expected_tag, &record.context_tag) {
            warn!(column = %identifier, "context commitment mismatch");
            return Err(Error::ContextMismatch);
        }

        if record.ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Integrity);
        }

        let aad = build_aad(identifier, cast_as, &record.context_tag, terms);
        let (nonce, sealed) = record.ciphertext.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&keys.dek));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                warn!(column = %identifier, "aead verification failed");
                Error::Integrity
            })
    }

    /// Compute the index material for one query predicate.
    ///
    /// Fails with [`Error::UnsupportedQuery`] when the column's schema has no
    /// index of the required kind.
    pub async fn query_term(
        &self,
        identifier: &Identifier,
        config: &ColumnConfig,
        query: Query,
    ) -> Result<QueryTerm, Error> {
        let keys = self.resolve_keys(identifier).await?;

        match query {
            Query::Eq(plaintext) => {
                let Some(IndexType::Unique { token_filters }) = config.unique_index() else {
                    return Err(unsupported(identifier, "eq"));
                };
                match index::blind_index(&keys, &plaintext, token_filters)? {
                    IndexTerm::Binary(digest) => Ok(QueryTerm::Equality(digest)),
                    _ => Err(Error::Encoding(
                        "blind index produced a non-binary term".to_string(),
                    )),
                }
            }
            Query::Range { min, max } => {
                if !config.has_ore_index() {
                    return Err(unsupported(identifier, "range"));
                }
                let min = min
                    .map(|bound| index::ore_blocks(&keys, &bound))
                    .transpose()?;
                let max = max
                    .map(|bound| index::ore_blocks(&keys, &bound))
                    .transpose()?;
                Ok(QueryTerm::RangeBounds { min, max })
            }
            Query::Match(text) => {
                let Some(IndexType::Match {
                    tokenizer,
                    token_filters,
                    k,
                    m,
                    include_original,
                }) = config.match_index()
                else {
                    return Err(unsupported(identifier, "match"));
                };
                let filtered = token_filters.iter().fold(text, |acc, filter| match filter {
                    crate::schema::TokenFilter::Downcase => acc.to_lowercase(),
                });
                let positions = index::bloom_positions(
                    &keys,
                    &filtered,
                    tokenizer,
                    *k,
                    *m,
                    *include_original,
                )?;
                Ok(QueryTerm::MatchTokens(positions))
            }
        }
    }

    async fn resolve_keys(&self, identifier: &Identifier) -> Result<Arc<ColumnKeySet>, Error> {
        if let Some(keys) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
        {
            return Ok(keys.clone());
        }

        let keys = tokio::time::timeout(self.timeout, self.provider.column_keys(identifier))
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "timed out after {}ms resolving keys for `{identifier}`",
                    self.timeout.as_millis()
                ))
            })??;

        let keys = Arc::new(keys);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.clone(), keys.clone());
        Ok(keys)
    }
}

/// Associated data binding the record to its column, cast, context, and
/// stored index terms.
fn build_aad(
    identifier: &Identifier,
    cast_as: CastAs,
    context_tag: &[u8; COMMITMENT_SIZE],
    terms: &[IndexTerm],
) -> Vec<u8> {
    let mut aad = Vec::new();
    aad.extend_from_slice(&RECORD_VERSION.to_be_bytes());
    aad.extend_from_slice(identifier.table.as_bytes());
    aad.push(0x1f);
    aad.extend_from_slice(identifier.column.as_bytes());
    aad.push(0x1f);
    aad.extend_from_slice(cast_as.to_string().as_bytes());
    aad.push(0x1f);
    aad.extend_from_slice(context_tag);
    aad.extend_from_slice(&index::canonical_term_bytes(terms));
    aad
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// SIV-style nonce for deterministic columns.
fn derived_nonce(
    keys: &ColumnKeySet,
    context_tag: &[u8; COMMITMENT_SIZE],
    message: &[u8],
) -> Result<[u8; NONCE_SIZE], Error> {
    let digest = hmac_sha256(
        &keys.nonce_key,
        &[b"cipherguard/nonce/v1", context_tag, message],
    )?;
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    Ok(nonce)
}

fn unsupported(identifier: &Identifier, op: &str) -> Error {
    Error::UnsupportedQuery {
        identifier: identifier.clone(),
        op: op.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Index, TokenFilter, Tokenizer};
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials {
            workspace_id: "w1".to_string(),
            access_key: "ak_test_0123456789".to_string(),
            dataset_id: "d1".to_string(),
        }
    }

    async fn cipher() -> DatasetCipher {
        DatasetCipher::init(credentials(), Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .await
            .unwrap()
    }

    fn email_config() -> ColumnConfig {
        ColumnConfig::build("email".to_string())
            .casts_as(CastAs::Text)
            .add_index(Index::new(IndexType::Unique {
                token_filters: vec![TokenFilter::Downcase],
            }))
            .add_index(Index::new_ore())
            .add_index(Index::new(IndexType::Match {
                tokenizer: Tokenizer::Standard,
                token_filters: vec![TokenFilter::Downcase],
                k: 6,
                m: 2048,
                include_original: false,
            }))
    }

    fn email_target(plaintext: &str, context: EncryptionContext) -> PlaintextTarget {
        PlaintextTarget::new(
            Plaintext::Utf8Str(plaintext.to_string()),
            Identifier::new("users", "email"),
            email_config(),
            context,
        )
    }

    #[tokio::test]
    async fn encrypt_decrypt_round_trip() {
        let cipher = cipher().await;
        let (record, terms) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();

        let recovered = cipher
            .decrypt(
                record,
                &Identifier::new("users", "email"),
                CastAs::Text,
                &terms,
                &EncryptionContext::empty(),
            )
            .await
            .unwrap();

        assert_eq!(recovered, b"alice@example.com");
    }

    #[tokio::test]
    async fn randomized_encryption_is_non_deterministic() {
        let cipher = cipher().await;
        let (a, _) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();
        let (b, _) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();

        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn deterministic_mode_repeats_ciphertexts() {
        let cipher = cipher().await;
        let config = ColumnConfig::build("ssn".to_string())
            .casts_as(CastAs::Text)
            .with_mode(EncryptionMode::Deterministic);
        let target = |value: &str| {
            PlaintextTarget::new(
                Plaintext::Utf8Str(value.to_string()),
                Identifier::new("users", "ssn"),
                config.clone(),
                EncryptionContext::empty(),
            )
        };

        let (a, _) = cipher.encrypt(target("078-05-1120")).await.unwrap();
        let (b, _) = cipher.encrypt(target("078-05-1120")).await.unwrap();
        let (c, _) = cipher.encrypt(target("219-09-9999")).await.unwrap();

        assert_eq!(a.ciphertext, b.ciphertext);
        assert_ne!(a.ciphertext, c.ciphertext);
    }

    #[tokio::test]
    async fn context_mismatch_is_distinguished_from_corruption() {
        let cipher = cipher().await;
        let context = EncryptionContext::from_value(&json!({"tenant": "t1"})).unwrap();
        let (record, terms) = cipher
            .encrypt(email_target("alice@example.com", context))
            .await
            .unwrap();
        let id = Identifier::new("users", "email");

        let wrong_context = EncryptionContext::from_value(&json!({"tenant": "t2"})).unwrap();
        let err = cipher
            .decrypt(record.clone(), &id, CastAs::Text, &terms, &wrong_context)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContextMismatch));

        let mut corrupted = record;
        let flip = NONCE_SIZE + 1;
        corrupted.ciphertext[flip] ^= 0xff;
        let right_context = EncryptionContext::from_value(&json!({"tenant": "t1"})).unwrap();
        let err = cipher
            .decrypt(corrupted, &id, CastAs::Text, &terms, &right_context)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity));
    }

    #[tokio::test]
    async fn mutated_index_terms_fail_integrity() {
        let cipher = cipher().await;
        let (record, mut terms) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();

        if let IndexTerm::Binary(digest) = &mut terms[0] {
            digest[0] ^= 0xff;
        } else {
            panic!("expected the unique term first");
        }

        let err = cipher
            .decrypt(
                record,
                &Identifier::new("users", "email"),
                CastAs::Text,
                &terms,
                &EncryptionContext::empty(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity));
    }

    #[tokio::test]
    async fn foreign_key_id_is_rejected() {
        let cipher = cipher().await;
        let (mut record, terms) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();
        record.key_id = "0011223344556677".to_string();

        let err = cipher
            .decrypt(
                record,
                &Identifier::new("users", "email"),
                CastAs::Text,
                &terms,
                &EncryptionContext::empty(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownKey(_)));
    }

    #[tokio::test]
    async fn query_terms_match_stored_terms() {
        let cipher = cipher().await;
        let id = Identifier::new("users", "email");
        let config = email_config();

        let (_, terms) = cipher
            .encrypt(email_target("alice@example.com", EncryptionContext::empty()))
            .await
            .unwrap();
        let IndexTerm::Binary(stored_eq) = &terms[0] else {
            panic!("expected the unique term first");
        };

        let term = cipher
            .query_term(
                &id,
                &config,
                Query::Eq(Plaintext::Utf8Str("ALICE@example.com".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(term, QueryTerm::Equality(stored_eq.clone()));
    }

    #[tokio::test]
    async fn unsupported_query_ops_are_rejected() {
        let cipher = cipher().await;
        let id = Identifier::new("users", "ssn");
        let config = ColumnConfig::build("ssn".to_string()).casts_as(CastAs::Text);

        let err = cipher
            .query_term(
                &id,
                &config,
                Query::Eq(Plaintext::Utf8Str("078-05-1120".to_string())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery { .. }));
    }

    #[tokio::test]
    async fn range_bounds_carry_each_present_bound() {
        let cipher = cipher().await;
        let id = Identifier::new("users", "age");
        let config = ColumnConfig::build("age".to_string())
            .casts_as(CastAs::Int)
            .add_index(Index::new_ore());

        let term = cipher
            .query_term(
                &id,
                &config,
                Query::Range {
                    min: Some(Plaintext::Int(18)),
                    max: None,
                },
            )
            .await
            .unwrap();

        let QueryTerm::RangeBounds { min, max } = term else {
            panic!("expected range bounds");
        };
        assert!(min.is_some());
        assert!(max.is_none());
    }
}
