//! Error types for the encryption engine.

use crate::schema::Identifier;

/// Errors produced by the encryption engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Plaintext could not be parsed as the column's cast type.
    #[error("invalid `{cast}` plaintext: {message}")]
    InvalidPlaintext {
        /// The cast type the plaintext was parsed against.
        cast: String,
        /// Description of the parse failure.
        message: String,
    },
    /// Encryption context was not a JSON object or `null`.
    #[error("invalid encryption context: {0}")]
    InvalidContext(String),
    /// The record's key identifier does not resolve under this dataset.
    #[error("unknown key id `{0}`")]
    UnknownKey(String),
    /// The supplied context does not match the context bound at encrypt time.
    #[error("encryption context does not match the context bound at encrypt time")]
    ContextMismatch,
    /// AEAD verification of the ciphertext failed.
    #[error("ciphertext integrity verification failed")]
    Integrity,
    /// Key resolution failed or exceeded the configured timeout.
    #[error("key service request failed: {0}")]
    Transport(String),
    /// The column's schema has no index supporting the requested query op.
    #[error("column `{identifier}` has no index supporting `{op}` queries")]
    UnsupportedQuery {
        /// The column the query referenced.
        identifier: Identifier,
        /// The requested query op.
        op: String,
    },
    /// Key derivation failure.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    /// Encoding or serialization failure.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// AEAD seal failure.
    #[error("aead failure: {0}")]
    Aead(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_never_empty() {
        let errors = [
            Error::InvalidPlaintext {
                cast: "int".to_string(),
                message: "invalid digit".to_string(),
            },
            Error::InvalidContext("expected an object".to_string()),
            Error::UnknownKey("deadbeef".to_string()),
            Error::ContextMismatch,
            Error::Integrity,
            Error::Transport("timed out".to_string()),
            Error::UnsupportedQuery {
                identifier: Identifier::new("users", "email"),
                op: "range".to_string(),
            },
            Error::KeyDerivation("expand failed".to_string()),
            Error::Encoding("bad hex".to_string()),
            Error::Aead("seal failed".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
