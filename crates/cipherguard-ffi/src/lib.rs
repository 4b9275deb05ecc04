//! C-ABI bridge for the cipherguard searchable field-level encryption client.
//!
//! This crate exposes a small set of C entry points over an opaque [`Client`]
//! handle: construct, encrypt, decrypt, their bulk variants, search-term
//! generation, and the two free routines. All payloads cross the boundary as
//! null-terminated UTF-8 JSON; all failures are reported through a trailing
//! `error_out` slot paired with a null return, never by unwinding.
//!
//! Ownership of every returned string transfers to the host, which must hand
//! it back through [`free_string()`]. The handle is internally synchronized
//! and may be used from any thread; [`free_client()`] must not race with any
//! other call on the same handle.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cipherguard_core::plaintext::Plaintext;
use cipherguard_core::schema::{CastAs, ColumnConfig, Identifier};
use cipherguard_core::{
    DatasetCipher, EncryptedRecord, EncryptionContext, IndexTerm, PlaintextTarget, Query,
    COMMITMENT_SIZE, RECORD_VERSION,
};
use encrypt_config::ClientConfig;
use libc::c_char;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ptr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

mod encrypt_config;
mod safe_ffi;

/// Marker prefix on decrypt responses whose recovered bytes are not valid
/// UTF-8 and were base64-encoded for the C string channel.
const BASE64_MARKER: &str = "base64:";

/// Get the shared async runtime instance.
///
/// Creates a new Tokio runtime on first call within the current process and
/// reuses it for subsequent calls in the same process.
fn runtime() -> Result<&'static Runtime, Error> {
    static RUNTIME: OnceCell<Runtime> = OnceCell::new();

    RUNTIME.get_or_try_init(|| Runtime::new().map_err(|e| Error::Runtime(e.to_string())))
}

/// An encryption client that manages cipher operations and configuration.
///
/// Cloning is cheap; both fields sit behind [`Arc`]s, and every operation
/// takes `&self`, so one handle serves concurrent callers.
#[derive(Clone)]
pub struct Client {
    cipher: Arc<DatasetCipher>,
    encrypt_config: Arc<HashMap<Identifier, ColumnConfig>>,
}

/// Stable error kinds carried in the error-channel JSON.
///
/// The snake_case rendering of each variant is the wire string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Constructor input not parseable or missing required fields.
    InvalidConfig,
    /// Operation input not parseable as the expected envelope.
    InvalidRequest,
    /// Referenced column unknown, or op incompatible with its schema.
    SchemaMismatch,
    /// Decrypt context does not match the encryption context.
    ContextMismatch,
    /// AEAD verification failed.
    IntegrityFailure,
    /// Wrapped key identifier cannot be resolved.
    UnknownKey,
    /// Ciphertext envelope version not recognized.
    VersionUnsupported,
    /// Key service call failed or timed out.
    TransportError,
    /// Any other condition.
    InternalError,
}

/// Errors that can occur during bridge operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Encryption engine error.
    #[error(transparent)]
    Core(#[from] cipherguard_core::Error),
    /// JSON parsing error.
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    /// UTF-8 string conversion error.
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    /// Configuration parsing or validation error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Unsupported schema version in the configuration.
    #[error("unsupported schema version {0}: only version 1 is supported")]
    UnsupportedSchemaVersion(u32),
    /// Operation input failed semantic validation.
    #[error("invalid request: {0}")]
    Request(String),
    /// Unknown column identifier for this client's configuration.
    #[error("unknown column `{0}`")]
    UnknownColumn(Identifier),
    /// Ciphertext envelope version not recognized.
    #[error("unsupported ciphertext envelope version {0}")]
    UnsupportedEnvelopeVersion(u16),
    /// Ciphertext envelope field could not be decoded.
    #[error("malformed ciphertext envelope: {0}")]
    MalformedEnvelope(String),

    /// Async runtime error.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Null pointer passed where non-null expected.
    #[error("null pointer provided")]
    NullPointer,
    /// String conversion error.
    #[error("string conversion error: {0}")]
    StringConversion(String),
    /// Internal invariant violation - indicates a bug in cipherguard-ffi.
    #[error("internal error: {0} (this is a bug in cipherguard-ffi)")]
    InvariantViolation(String),
}

impl Error {
    /// The stable kind string reported through the error channel.
    pub fn kind(&self) -> ErrorKind {
        use cipherguard_core::Error as Core;

        match self {
            Error::InvalidConfig(_) | Error::UnsupportedSchemaVersion(_) => ErrorKind::InvalidConfig,
            Error::Parse(_) | Error::Utf8(_) | Error::NullPointer | Error::Request(_) => {
                ErrorKind::InvalidRequest
            }
            Error::UnknownColumn(_) => ErrorKind::SchemaMismatch,
            Error::UnsupportedEnvelopeVersion(_) => ErrorKind::VersionUnsupported,
            Error::MalformedEnvelope(_) => ErrorKind::IntegrityFailure,
            Error::Runtime(_) | Error::StringConversion(_) | Error::InvariantViolation(_) => {
                ErrorKind::InternalError
            }
            Error::Core(core) => match core {
                Core::InvalidPlaintext { .. } | Core::InvalidContext(_) => ErrorKind::InvalidRequest,
                Core::UnsupportedQuery { .. } => ErrorKind::SchemaMismatch,
                Core::ContextMismatch => ErrorKind::ContextMismatch,
                Core::Integrity => ErrorKind::IntegrityFailure,
                Core::UnknownKey(_) => ErrorKind::UnknownKey,
                Core::Transport(_) => ErrorKind::TransportError,
                Core::KeyDerivation(_) | Core::Encoding(_) | Core::Aead(_) => {
                    ErrorKind::InternalError
                }
            },
        }
    }
}

/// The ciphertext envelope emitted by encrypt operations.
///
/// Index term fields are present only when the column's schema configures
/// the corresponding index; decrypt rebuilds them in `hm`, `ob`, `bf` order,
/// which is the order they were generated in.
#[derive(Debug, Deserialize, Serialize)]
pub struct Encrypted {
    /// Envelope version for backward compatibility.
    #[serde(rename = "v")]
    version: u16,
    /// Base64-encoded nonce, ciphertext, and AEAD tag.
    #[serde(rename = "c")]
    ciphertext: String,
    /// Hex identifier of the data-encryption key.
    #[serde(rename = "k")]
    key_id: String,
    /// Hex commitment to the encryption context.
    #[serde(rename = "x")]
    context_tag: String,
    /// Table and column identifier for this encrypted value.
    #[serde(rename = "i")]
    identifier: Identifier,
    /// Data type for casting.
    #[serde(rename = "dt")]
    data_type: CastAs,
    /// HMAC index for exact equality queries and uniqueness constraints.
    #[serde(rename = "hm", skip_serializing_if = "Option::is_none")]
    unique_index: Option<String>,
    /// Order-revealing index for range comparisons and sorting.
    #[serde(rename = "ob", skip_serializing_if = "Option::is_none")]
    ore_index: Option<Vec<String>>,
    /// Bloom filter index for full-text search queries.
    #[serde(rename = "bf", skip_serializing_if = "Option::is_none")]
    match_index: Option<Vec<u16>>,
}

/// Assemble the wire envelope from a sealed record and its index terms.
fn to_envelope(
    record: EncryptedRecord,
    identifier: Identifier,
    cast_as: CastAs,
    terms: Vec<IndexTerm>,
) -> Result<Encrypted, Error> {
    let mut unique_index = None;
    let mut ore_index = None;
    let mut match_index = None;

    for term in terms {
        match term {
            IndexTerm::Binary(bytes) => unique_index = Some(hex::encode(bytes)),
            IndexTerm::OreArray(blocks) => {
                ore_index = Some(blocks.iter().map(hex::encode).collect())
            }
            IndexTerm::BitMap(bits) => match_index = Some(bits),
            IndexTerm::Null => {}
        }
    }

    Ok(Encrypted {
        version: RECORD_VERSION,
        ciphertext: BASE64.encode(&record.ciphertext),
        key_id: record.key_id,
        context_tag: hex::encode(record.context_tag),
        identifier,
        data_type: cast_as,
        unique_index,
        ore_index,
        match_index,
    })
}

impl Encrypted {
    /// Decode the wire envelope back into a record and its stored index
    /// terms, in generation order.
    ///
    /// The version is checked before any field is decoded; decode failures
    /// in the remaining fields indicate a tampered or truncated envelope.
    fn into_record_and_terms(self) -> Result<(EncryptedRecord, Identifier, CastAs, Vec<IndexTerm>), Error> {
        if self.version != RECORD_VERSION {
            return Err(Error::UnsupportedEnvelopeVersion(self.version));
        }

        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|e| Error::MalformedEnvelope(format!("ciphertext: {e}")))?;

        let tag_bytes = hex::decode(&self.context_tag)
            .map_err(|e| Error::MalformedEnvelope(format!("context tag: {e}")))?;
        let context_tag: [u8; COMMITMENT_SIZE] = tag_bytes
            .try_into()
            .map_err(|_| Error::MalformedEnvelope("context tag length".to_string()))?;

        let mut terms = Vec::new();
        if let Some(hm) = &self.unique_index {
            let digest = hex::decode(hm)
                .map_err(|e| Error::MalformedEnvelope(format!("unique index: {e}")))?;
            terms.push(IndexTerm::Binary(digest));
        }
        if let Some(ob) = &self.ore_index {
            let blocks = ob
                .iter()
                .map(|block| hex::decode(block))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Error::MalformedEnvelope(format!("ore index: {e}")))?;
            terms.push(IndexTerm::OreArray(blocks));
        }
        if let Some(bf) = self.match_index.clone() {
            terms.push(IndexTerm::BitMap(bf));
        }

        let record = EncryptedRecord {
            key_id: self.key_id,
            ciphertext,
            context_tag,
        };

        Ok((record, self.identifier, self.data_type, terms))
    }
}

/// Parse an encryption context JSON string: an object, or the literal
/// `null` for the empty context.
fn parse_encryption_context(context_json: &str) -> Result<EncryptionContext, Error> {
    let value: serde_json::Value = serde_json::from_str(context_json)?;
    Ok(EncryptionContext::from_value(&value)?)
}

/// Context from an already-parsed optional JSON value, as bulk items carry.
fn context_from_value(value: Option<serde_json::Value>) -> Result<EncryptionContext, Error> {
    match value {
        Some(value) => Ok(EncryptionContext::from_value(&value)?),
        None => Ok(EncryptionContext::empty()),
    }
}

/// Recovered plaintext as a C-channel string. Bytes that are not valid
/// UTF-8 are base64-encoded behind a marker prefix; the channel never
/// carries raw non-UTF-8 bytes.
fn plaintext_from_bytes(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(plaintext) => plaintext,
        Err(err) => format!("{BASE64_MARKER}{}", BASE64.encode(err.as_bytes())),
    }
}

/// Creates a new client instance from the provided configuration JSON.
///
/// # Errors
///
/// Returns an error if the `config_json` is invalid JSON, is missing
/// required fields, carries an unsupported schema version, or if the client
/// cannot be initialized.
///
/// # Safety
///
/// The caller must ensure `config_json` points to a valid null-terminated C
/// string. The returned pointer must be freed using [`free_client()`].
#[no_mangle]
pub extern "C" fn new_client(
    config_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut Client {
    let result: Result<Box<Client>, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let config_json = safe_ffi::c_str_to_string(config_json)?;
            let config = ClientConfig::from_str(&config_json)?;
            let client = new_client_inner(config).await?;
            Ok(Box::new(client))
        })
    });

    handle_ffi_result!(result, error_out, Box::into_raw)
}

async fn new_client_inner(config: ClientConfig) -> Result<Client, Error> {
    if let Some(endpoint) = &config.endpoint {
        debug!(%endpoint, "endpoint override present in config");
    }

    let credentials = config.credentials();
    let timeout = config.timeout();
    let cipher = DatasetCipher::init(credentials, timeout).await?;

    Ok(Client {
        cipher: Arc::new(cipher),
        encrypt_config: Arc::new(config.into_config_map()),
    })
}

/// Encrypts plaintext for a specific table column.
///
/// Returns a JSON string containing the ciphertext envelope, including any
/// index terms the column's schema requires. `context_json` may be null or
/// the JSON literal `null` for the empty context.
///
/// # Errors
///
/// Returns an error if the table/column is not found in the encryption
/// configuration, the plaintext does not parse as the column's cast type,
/// the context JSON is malformed, or encryption fails.
///
/// # Safety
///
/// All pointer parameters must be valid null-terminated C strings.
/// The returned pointer must be freed using [`free_string()`].
#[no_mangle]
pub extern "C" fn encrypt(
    client: *const Client,
    plaintext: *const c_char,
    column: *const c_char,
    table: *const c_char,
    context_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    let result: Result<String, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let client = safe_ffi::client_ref(client)?;
            let plaintext = safe_ffi::c_str_to_string(plaintext)?;
            let column = safe_ffi::c_str_to_string(column)?;
            let table = safe_ffi::c_str_to_string(table)?;
            let context = safe_ffi::optional_c_str_to_string(context_json)?;

            let context = match context {
                Some(context) => parse_encryption_context(&context)?,
                None => EncryptionContext::empty(),
            };

            let encrypted =
                encrypt_inner(client.clone(), plaintext, column, table, context).await?;
            serde_json::to_string(&encrypted).map_err(Error::from)
        })
    });

    handle_ffi_result!(result, error_out, |json_string| {
        safe_ffi::string_to_c_str(json_string).unwrap_or(ptr::null_mut())
    })
}

async fn encrypt_inner(
    client: Client,
    plaintext: String,
    column: String,
    table: String,
    context: EncryptionContext,
) -> Result<Encrypted, Error> {
    let identifier = Identifier::new(table, column);
    let config = client
        .encrypt_config
        .get(&identifier)
        .cloned()
        .ok_or_else(|| Error::UnknownColumn(identifier.clone()))?;

    let plaintext = Plaintext::parse(&plaintext, config.cast_as)?;
    let cast_as = config.cast_as;
    let target = PlaintextTarget::new(plaintext, identifier.clone(), config, context);

    let (record, terms) = client.cipher.encrypt(target).await?;
    to_envelope(record, identifier, cast_as, terms)
}

/// Decrypts a ciphertext envelope with optional encryption context.
///
/// Returns the recovered plaintext string.
///
/// # Errors
///
/// Returns an error if the envelope is malformed, its version is not
/// recognized, its key identifier does not resolve, the context does not
/// match the one bound at encrypt time, or AEAD verification fails.
///
/// # Safety
///
/// All pointer parameters must be valid null-terminated C strings.
/// The returned pointer must be freed using [`free_string()`].
#[no_mangle]
pub extern "C" fn decrypt(
    client: *const Client,
    ciphertext_json: *const c_char,
    context_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    let result: Result<String, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let client = safe_ffi::client_ref(client)?;
            let ciphertext_json = safe_ffi::c_str_to_string(ciphertext_json)?;
            let context = safe_ffi::optional_c_str_to_string(context_json)?;

            let context = match context {
                Some(context) => parse_encryption_context(&context)?,
                None => EncryptionContext::empty(),
            };

            decrypt_inner(client.clone(), ciphertext_json, context).await
        })
    });

    handle_ffi_result!(result, error_out, |plaintext| {
        safe_ffi::string_to_c_str(plaintext).unwrap_or(ptr::null_mut())
    })
}

async fn decrypt_inner(
    client: Client,
    ciphertext_json: String,
    context: EncryptionContext,
) -> Result<String, Error> {
    let envelope: Encrypted = serde_json::from_str(&ciphertext_json)?;
    let (record, identifier, cast_as, terms) = envelope.into_record_and_terms()?;

    let bytes = client
        .cipher
        .decrypt(record, &identifier, cast_as, &terms, &context)
        .await?;

    Ok(plaintext_from_bytes(bytes))
}

/// A bulk request: an array of items under the `items` key.
#[derive(Deserialize)]
struct BulkRequest<T> {
    items: Vec<T>,
}

/// Bulk encryption request item: a client-assigned id plus the single
/// encrypt arguments.
#[derive(Deserialize)]
struct BulkEncryptItem {
    /// Opaque identifier echoed in the paired result.
    id: serde_json::Value,
    /// The plaintext data to encrypt.
    plaintext: String,
    /// The target column name.
    column: String,
    /// The target table name.
    table: String,
    /// Optional encryption context (defaults to empty if not provided).
    #[serde(default)]
    context: Option<serde_json::Value>,
}

/// Bulk decryption request item: a client-assigned id plus the single
/// decrypt arguments.
#[derive(Deserialize)]
struct BulkDecryptItem {
    /// Opaque identifier echoed in the paired result.
    id: serde_json::Value,
    /// The ciphertext envelope to decrypt.
    ciphertext: serde_json::Value,
    /// Optional encryption context (defaults to empty if not provided).
    #[serde(default)]
    context: Option<serde_json::Value>,
}

/// The bulk response: one result per input item, in input order.
#[derive(Serialize)]
struct BulkResponse {
    results: Vec<BulkResult>,
}

/// One bulk result, carrying either a success payload or an inline error.
#[derive(Serialize)]
struct BulkResult {
    /// The input item's identifier.
    id: serde_json::Value,
    /// The success payload, when the item succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<serde_json::Value>,
    /// The structured error, when the item failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

/// The inline error body paired with a failed bulk item.
#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

impl BulkResult {
    fn from_outcome(id: serde_json::Value, outcome: Result<serde_json::Value, Error>) -> Self {
        match outcome {
            Ok(payload) => Self {
                id,
                ok: Some(payload),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: None,
                error: Some(ErrorBody {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                }),
            },
        }
    }
}

/// Encrypts multiple plaintext items in bulk.
///
/// Items are processed independently and concurrently; a failed item is
/// reported inline in its result rather than aborting the batch. The
/// response pairs each input id with exactly one result, in input order.
/// A null return is reserved for an unparseable request envelope or an
/// invalid handle.
///
/// # Errors
///
/// Returns an error only if the request envelope itself cannot be parsed.
///
/// # Safety
///
/// All pointer parameters must be valid null-terminated C strings.
/// The returned pointer must be freed using [`free_string()`].
#[no_mangle]
pub extern "C" fn encrypt_bulk(
    client: *const Client,
    items_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    let result: Result<String, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let client = safe_ffi::client_ref(client)?.clone();
            let items_json = safe_ffi::c_str_to_string(items_json)?;
            let request: BulkRequest<BulkEncryptItem> = serde_json::from_str(&items_json)?;

            let mut handles = Vec::with_capacity(request.items.len());
            for item in request.items {
                let BulkEncryptItem {
                    id,
                    plaintext,
                    column,
                    table,
                    context,
                } = item;
                let client = client.clone();
                let handle = tokio::spawn(async move {
                    let context = context_from_value(context)?;
                    let encrypted =
                        encrypt_inner(client, plaintext, column, table, context).await?;
                    serde_json::to_value(&encrypted).map_err(Error::from)
                });
                handles.push((id, handle));
            }

            let mut results = Vec::with_capacity(handles.len());
            for (id, handle) in handles {
                let outcome = handle.await.map_err(|e| Error::Runtime(e.to_string()))?;
                results.push(BulkResult::from_outcome(id, outcome));
            }

            serde_json::to_string(&BulkResponse { results }).map_err(Error::from)
        })
    });

    handle_ffi_result!(result, error_out, |json_string| {
        safe_ffi::string_to_c_str(json_string).unwrap_or(ptr::null_mut())
    })
}

/// Decrypts multiple ciphertext envelopes in bulk.
///
/// Same independence, ordering, and inline-error semantics as
/// [`encrypt_bulk()`].
///
/// # Errors
///
/// Returns an error only if the request envelope itself cannot be parsed.
///
/// # Safety
///
/// All pointer parameters must be valid null-terminated C strings.
/// The returned pointer must be freed using [`free_string()`].
#[no_mangle]
pub extern "C" fn decrypt_bulk(
    client: *const Client,
    items_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    let result: Result<String, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let client = safe_ffi::client_ref(client)?.clone();
            let items_json = safe_ffi::c_str_to_string(items_json)?;
            let request: BulkRequest<BulkDecryptItem> = serde_json::from_str(&items_json)?;

            let mut handles = Vec::with_capacity(request.items.len());
            for item in request.items {
                let BulkDecryptItem {
                    id,
                    ciphertext,
                    context,
                } = item;
                let client = client.clone();
                let handle = tokio::spawn(async move {
                    let context = context_from_value(context)?;
                    let ciphertext_json = match ciphertext {
                        serde_json::Value::String(json) => json,
                        envelope => serde_json::to_string(&envelope)?,
                    };
                    let plaintext = decrypt_inner(client, ciphertext_json, context).await?;
                    Ok(serde_json::Value::String(plaintext))
                });
                handles.push((id, handle));
            }

            let mut results = Vec::with_capacity(handles.len());
            for (id, handle) in handles {
                let outcome = handle.await.map_err(|e| Error::Runtime(e.to_string()))?;
                results.push(BulkResult::from_outcome(id, outcome));
            }

            serde_json::to_string(&BulkResponse { results }).map_err(Error::from)
        })
    });

    handle_ffi_result!(result, error_out, |json_string| {
        safe_ffi::string_to_c_str(json_string).unwrap_or(ptr::null_mut())
    })
}

/// Query operations supported by the search-term surface.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
enum QueryOp {
    /// Exact equality against the blind index.
    Eq,
    /// Range comparison against the order index.
    Range,
    /// Full-text match against the bloom index.
    Match,
}

/// The search-terms request: an array of predicates under the `terms` key.
#[derive(Deserialize)]
struct SearchTermsRequest {
    terms: Vec<SearchTermItem>,
}

/// One query predicate over a logical column.
#[derive(Deserialize)]
struct SearchTermItem {
    /// The target column name.
    column: String,
    /// The target table name.
    table: String,
    /// The query operation.
    op: QueryOp,
    /// The predicate value: a string for `eq` and `match`, an object with
    /// `min`/`max` bounds for `range`.
    value: serde_json::Value,
}

/// Bounds of a range predicate, each an ORE block sequence.
#[derive(Deserialize, Serialize)]
struct RangeBoundsValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<serde_json::Value>,
}

/// One computed search term, paired positionally with its input predicate.
#[derive(Serialize)]
struct SearchTermResult {
    column: String,
    table: String,
    op: QueryOp,
    /// Hex blind-index digest, for `eq`.
    #[serde(skip_serializing_if = "Option::is_none")]
    index_value: Option<String>,
    /// Hex ORE blocks per present bound, for `range`.
    #[serde(skip_serializing_if = "Option::is_none")]
    range_bounds: Option<RangeBoundsValue>,
    /// Bloom bit positions, for `match`.
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<Vec<u16>>,
}

/// Computes the index values server-side comparators need to evaluate query
/// predicates against stored ciphertexts, without decryption.
///
/// The response preserves input order. The whole call fails on the first
/// invalid predicate; there is no per-term error channel.
///
/// # Errors
///
/// Returns an error if the request cannot be parsed, a predicate references
/// an unknown column, or a predicate's op is not supported by the column's
/// configured indexes.
///
/// # Safety
///
/// All pointer parameters must be valid null-terminated C strings.
/// The returned pointer must be freed using [`free_string()`].
#[no_mangle]
pub extern "C" fn create_search_terms(
    client: *const Client,
    terms_json: *const c_char,
    error_out: *mut *mut c_char,
) -> *mut c_char {
    let result: Result<String, Error> = runtime().and_then(|rt| {
        rt.block_on(async {
            let client = safe_ffi::client_ref(client)?;
            let terms_json = safe_ffi::c_str_to_string(terms_json)?;
            let request: SearchTermsRequest = serde_json::from_str(&terms_json)?;

            let mut terms = Vec::with_capacity(request.terms.len());
            for item in request.terms {
                terms.push(search_term_inner(client.clone(), item).await?);
            }

            serde_json::to_string(&serde_json::json!({ "terms": terms }))
                .map_err(Error::from)
        })
    });

    handle_ffi_result!(result, error_out, |json_string| {
        safe_ffi::string_to_c_str(json_string).unwrap_or(ptr::null_mut())
    })
}

async fn search_term_inner(client: Client, item: SearchTermItem) -> Result<SearchTermResult, Error> {
    let identifier = Identifier::new(item.table.clone(), item.column.clone());
    let config = client
        .encrypt_config
        .get(&identifier)
        .ok_or_else(|| Error::UnknownColumn(identifier.clone()))?;

    let query = match item.op {
        QueryOp::Eq => Query::Eq(predicate_plaintext(&item.value, config.cast_as, "eq")?),
        QueryOp::Match => {
            let text = item
                .value
                .as_str()
                .ok_or_else(|| Error::Request("`match` value must be a string".to_string()))?;
            Query::Match(text.to_owned())
        }
        QueryOp::Range => {
            let bounds: RangeBoundsValue = serde_json::from_value(item.value.clone())?;
            let min = bounds
                .min
                .map(|bound| predicate_plaintext(&bound, config.cast_as, "range"))
                .transpose()?;
            let max = bounds
                .max
                .map(|bound| predicate_plaintext(&bound, config.cast_as, "range"))
                .transpose()?;
            if min.is_none() && max.is_none() {
                return Err(Error::Request(
                    "`range` value must carry at least one of `min` and `max`".to_string(),
                ));
            }
            Query::Range { min, max }
        }
    };

    let term = client.cipher.query_term(&identifier, config, query).await?;

    let mut result = SearchTermResult {
        column: item.column,
        table: item.table,
        op: item.op,
        index_value: None,
        range_bounds: None,
        tokens: None,
    };

    match term {
        cipherguard_core::QueryTerm::Equality(digest) => {
            result.index_value = Some(hex::encode(digest));
        }
        cipherguard_core::QueryTerm::RangeBounds { min, max } => {
            let encode = |blocks: Vec<Vec<u8>>| {
                serde_json::Value::Array(
                    blocks
                        .iter()
                        .map(|block| serde_json::Value::String(hex::encode(block)))
                        .collect(),
                )
            };
            result.range_bounds = Some(RangeBoundsValue {
                min: min.map(encode),
                max: max.map(encode),
            });
        }
        cipherguard_core::QueryTerm::MatchTokens(positions) => {
            result.tokens = Some(positions);
        }
    }

    Ok(result)
}

/// Parse a predicate value as the column's cast type.
fn predicate_plaintext(
    value: &serde_json::Value,
    cast_as: CastAs,
    op: &str,
) -> Result<Plaintext, Error> {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => {
            return Err(Error::Request(format!(
                "`{op}` value must be a scalar, got `{other}`"
            )))
        }
    };
    Ok(Plaintext::parse(&raw, cast_as)?)
}

/// Frees a client instance and its associated resources.
///
/// Key material owned by the handle is zeroized on drop. A null pointer is
/// a no-op.
///
/// # Safety
///
/// The `client` pointer must have been returned by [`new_client()`] and not
/// previously freed; it must not race with any other call on the same
/// handle.
#[no_mangle]
pub extern "C" fn free_client(client: *mut Client) {
    safe_ffi::free_boxed_client(client);
}

/// Frees a C string allocated by this library.
///
/// A null pointer is a no-op.
///
/// # Safety
///
/// The `string` pointer must have been returned by this library and not
/// previously freed.
#[no_mangle]
pub extern "C" fn free_string(string: *mut c_char) {
    safe_ffi::free_c_string(string);
}
