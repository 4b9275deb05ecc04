//! Column schema model: identifiers, cast types, encryption modes, and index
//! configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

/// Table and column identifier for schema and key lookups.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Identifier {
    /// The table name.
    #[serde(rename = "t")]
    pub table: String,
    /// The column name.
    #[serde(rename = "c")]
    pub column: String,
}

impl Identifier {
    /// Create a new table and column identifier.
    pub fn new<S>(table: S, column: S) -> Self
    where
        S: Into<String>,
    {
        let table = table.into();
        let column = column.into();

        Self { table, column }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Data type casting options for encrypted columns.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CastAs {
    /// Treat as UTF-8 text (default).
    #[default]
    Text,
    /// Treat as a boolean value.
    Boolean,
    /// Treat as a 16-bit integer.
    SmallInt,
    /// Treat as a 32-bit integer.
    Int,
    /// Treat as a 64-bit integer.
    BigInt,
    /// Treat as a single-precision float.
    Real,
    /// Treat as a double-precision float.
    Double,
    /// Treat as a date.
    Date,
    /// Treat as a JSONB value.
    #[serde(rename = "jsonb")]
    #[strum(serialize = "jsonb")]
    JsonB,
}

/// Nonce discipline for a column.
///
/// Randomized columns draw a fresh nonce per call; deterministic columns
/// derive the nonce from the plaintext and context so identical inputs
/// produce identical envelopes.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EncryptionMode {
    /// Fresh random nonce per encryption (default).
    #[default]
    Randomized,
    /// Nonce derived from plaintext and context.
    Deterministic,
}

/// Token filters applied before index term generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenFilter {
    /// Lowercase tokens before hashing.
    Downcase,
}

/// Tokenizers for full-text match indexes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tokenizer {
    /// Split on non-alphanumeric boundaries.
    Standard,
    /// Sliding character n-grams.
    Ngram {
        /// Length of each n-gram in characters.
        token_length: usize,
    },
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::Standard
    }
}

/// The kind of index configured on a column.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexType {
    /// HMAC blind index for exact equality queries.
    Unique {
        /// Token filters applied to the value before hashing.
        token_filters: Vec<TokenFilter>,
    },
    /// Order-revealing index for range comparisons and sorting.
    Ore,
    /// Bloom filter index for full-text match queries.
    Match {
        /// The tokenizer splitting the text.
        tokenizer: Tokenizer,
        /// Token filters applied to each token.
        token_filters: Vec<TokenFilter>,
        /// Number of hash functions for the bloom filter.
        k: usize,
        /// Bloom filter size in bits.
        m: usize,
        /// Whether the unsplit value is added as a token.
        include_original: bool,
    },
}

/// A single configured index.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// The index kind and its options.
    pub index_type: IndexType,
}

impl Index {
    /// Create an index of the given type.
    pub fn new(index_type: IndexType) -> Self {
        Self { index_type }
    }

    /// Create an order-revealing index.
    pub fn new_ore() -> Self {
        Self::new(IndexType::Ore)
    }
}

/// Configuration of a single encrypted column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConfig {
    /// The column name.
    pub name: String,
    /// The cast type applied to incoming plaintext.
    pub cast_as: CastAs,
    /// The nonce discipline.
    pub mode: EncryptionMode,
    /// Configured indexes, in term-generation order.
    pub indexes: Vec<Index>,
}

impl ColumnConfig {
    /// Start building a column configuration with defaults.
    pub fn build(name: String) -> Self {
        Self {
            name,
            cast_as: CastAs::default(),
            mode: EncryptionMode::default(),
            indexes: Vec::new(),
        }
    }

    /// Set the cast type.
    pub fn casts_as(mut self, cast_as: CastAs) -> Self {
        self.cast_as = cast_as;
        self
    }

    /// Set the nonce discipline.
    pub fn with_mode(mut self, mode: EncryptionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Append an index.
    pub fn add_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// The unique index configured on this column, if any.
    pub fn unique_index(&self) -> Option<&IndexType> {
        self.indexes
            .iter()
            .map(|index| &index.index_type)
            .find(|index_type| matches!(index_type, IndexType::Unique { .. }))
    }

    /// Whether an order-revealing index is configured on this column.
    pub fn has_ore_index(&self) -> bool {
        self.indexes
            .iter()
            .any(|index| matches!(index.index_type, IndexType::Ore))
    }

    /// The match index configured on this column, if any.
    pub fn match_index(&self) -> Option<&IndexType> {
        self.indexes
            .iter()
            .map(|index| &index.index_type)
            .find(|index_type| matches!(index_type, IndexType::Match { .. }))
    }
}
