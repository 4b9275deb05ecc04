//! Constructor configuration parsing: workspace credentials plus the
//! per-column encryption schema.

use cipherguard_core::schema::{
    CastAs, ColumnConfig, EncryptionMode, Identifier, Index, IndexType, TokenFilter, Tokenizer,
};
use cipherguard_core::{Credentials, DEFAULT_TIMEOUT_MS};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Supported schema versions.
const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

/// Largest accepted bloom filter size. Bit positions are 16-bit values
/// reduced modulo `m`.
const MAX_BLOOM_BITS: usize = 65535;

/// Largest accepted bloom hash round count. The round counter is a single
/// byte of the keyed hash input.
const MAX_BLOOM_ROUNDS: usize = 255;

/// The constructor envelope. Unknown fields are ignored for forward
/// compatibility.
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// The workspace identifier.
    pub workspace_id: String,
    /// The access key credentials are derived from.
    pub access_key: String,
    /// The dataset identifier.
    pub dataset_id: String,
    /// Optional key-service endpoint override.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bound on key resolution, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// The encryption schema, pushed at construction.
    #[serde(default)]
    pub schema: Schema,
}

/// Root schema structure parsed from the config envelope.
#[derive(Debug, Deserialize)]
pub struct Schema {
    /// The schema version.
    #[serde(default = "default_schema_version")]
    pub v: u32,
    /// The set of table configurations.
    #[serde(default)]
    pub tables: Tables,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            v: default_schema_version(),
            tables: Tables::default(),
        }
    }
}

/// Collection of table configurations indexed by table name.
#[derive(Debug, Deserialize, Default)]
pub struct Tables(HashMap<String, Table>);

impl IntoIterator for Tables {
    type Item = (String, Table);
    type IntoIter = std::collections::hash_map::IntoIter<String, Table>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Table configuration containing column definitions indexed by column name.
#[derive(Debug, Deserialize, Default)]
pub struct Table(HashMap<String, Column>);

impl IntoIterator for Table {
    type Item = (String, Column);
    type IntoIter = std::collections::hash_map::IntoIter<String, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Column configuration with casting, nonce discipline, and indexes.
#[derive(Debug, Default, Deserialize)]
pub struct Column {
    /// Data type casting for this column.
    #[serde(default)]
    cast_as: CastAs,
    /// Nonce discipline for this column.
    #[serde(default)]
    mode: EncryptionMode,
    /// Collection of encryption indexes for this column.
    #[serde(default)]
    indexes: Indexes,
}

/// Collection of indexes for searchable encryption.
#[derive(Debug, Deserialize, Default)]
pub struct Indexes {
    /// Blind index for exact equality queries.
    #[serde(rename = "unique")]
    unique_index: Option<UniqueIndexOpts>,
    /// Order-revealing index for range comparisons and sorting.
    #[serde(rename = "ore")]
    ore_index: Option<OreIndexOpts>,
    /// Full-text search index using bloom filters.
    #[serde(rename = "match")]
    match_index: Option<MatchIndexOpts>,
}

/// Configuration options for blind equality indexes.
#[derive(Debug, Deserialize)]
pub struct UniqueIndexOpts {
    /// Token filters applied to the value before hashing.
    #[serde(default)]
    token_filters: Vec<TokenFilter>,
}

/// Configuration options for order-revealing indexes.
#[derive(Debug, Deserialize)]
pub struct OreIndexOpts {}

/// Configuration options for full-text match indexes.
#[derive(Debug, Deserialize)]
pub struct MatchIndexOpts {
    /// The tokenizer to use for splitting text.
    #[serde(default)]
    tokenizer: Tokenizer,
    /// Token filters to apply to tokens.
    #[serde(default)]
    token_filters: Vec<TokenFilter>,
    /// Number of hash functions for the bloom filter.
    #[serde(default = "default_k")]
    k: usize,
    /// Bloom filter size in bits.
    #[serde(default = "default_m")]
    m: usize,
    /// Whether to include the original value in the index.
    #[serde(default)]
    include_original: bool,
}

/// Default hash function count for bloom filters.
fn default_k() -> usize {
    6
}

/// Default bloom filter size in bits.
fn default_m() -> usize {
    2048
}

impl FromStr for ClientConfig {
    type Err = crate::Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let config: ClientConfig =
            serde_json::from_str(data).map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        if !SUPPORTED_SCHEMA_VERSIONS.contains(&config.schema.v) {
            return Err(crate::Error::UnsupportedSchemaVersion(config.schema.v));
        }

        for (field, value) in [
            ("workspace_id", &config.workspace_id),
            ("access_key", &config.access_key),
            ("dataset_id", &config.dataset_id),
        ] {
            if value.is_empty() {
                return Err(crate::Error::InvalidConfig(format!(
                    "`{field}` must not be empty"
                )));
            }
        }

        config.validate_indexes()?;

        Ok(config)
    }
}

impl ClientConfig {
    /// Reject index options the term generators cannot honor. Bloom bit
    /// positions are `u16` values reduced modulo `m`, and the hash round
    /// counter is a single byte, so out-of-range `m` or `k` must fail here
    /// rather than at encrypt time.
    fn validate_indexes(&self) -> Result<(), crate::Error> {
        for (table_name, table) in &self.schema.tables.0 {
            for (column_name, column) in &table.0 {
                let Some(opts) = &column.indexes.match_index else {
                    continue;
                };
                if opts.m == 0 || opts.m > MAX_BLOOM_BITS {
                    return Err(crate::Error::InvalidConfig(format!(
                        "`{table_name}.{column_name}` match index `m` must be between 1 and {MAX_BLOOM_BITS}, got {}",
                        opts.m
                    )));
                }
                if opts.k == 0 || opts.k > MAX_BLOOM_ROUNDS {
                    return Err(crate::Error::InvalidConfig(format!(
                        "`{table_name}.{column_name}` match index `k` must be between 1 and {MAX_BLOOM_ROUNDS}, got {}",
                        opts.k
                    )));
                }
            }
        }
        Ok(())
    }

    /// The credentials the key hierarchy is derived from.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            workspace_id: self.workspace_id.clone(),
            access_key: self.access_key.clone(),
            dataset_id: self.dataset_id.clone(),
        }
    }

    /// The bound applied to key resolution.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Convert the schema into a [`HashMap`] mapping [`Identifier`] to
    /// [`ColumnConfig`] for fast column lookups.
    pub fn into_config_map(self) -> HashMap<Identifier, ColumnConfig> {
        let mut map = HashMap::new();
        for (table_name, columns) in self.schema.tables.into_iter() {
            for (column_name, column) in columns.into_iter() {
                let column_config = column.into_column_config(&column_name);
                let key = Identifier::new(&table_name, &column_name);
                map.insert(key, column_config);
            }
        }
        map
    }
}

impl Column {
    /// Convert this column configuration into a [`ColumnConfig`].
    pub fn into_column_config(self, name: &str) -> ColumnConfig {
        let mut config = ColumnConfig::build(name.to_string())
            .casts_as(self.cast_as)
            .with_mode(self.mode);

        if let Some(opts) = self.indexes.unique_index {
            config = config.add_index(Index::new(IndexType::Unique {
                token_filters: opts.token_filters,
            }));
        }

        if self.indexes.ore_index.is_some() {
            config = config.add_index(Index::new_ore());
        }

        if let Some(opts) = self.indexes.match_index {
            config = config.add_index(Index::new(IndexType::Match {
                tokenizer: opts.tokenizer,
                token_filters: opts.token_filters,
                k: opts.k,
                m: opts.m,
                include_original: opts.include_original,
            }));
        }

        config
    }
}
