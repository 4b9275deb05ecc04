//! Index term generation: equality blind index, order-revealing prefix
//! blocks, and bloom-filter match positions.
//!
//! All terms are deterministic under a fixed column key set, so terms
//! computed at query time compare directly against terms stored at encrypt
//! time.

use crate::error::Error;
use crate::keys::{hmac_sha256, ColumnKeySet};
use crate::plaintext::Plaintext;
use crate::schema::{ColumnConfig, IndexType, TokenFilter, Tokenizer};

/// Bytes of each ORE prefix block kept in the wire representation.
const ORE_BLOCK_BYTES: usize = 8;

/// One index term attached to a ciphertext envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexTerm {
    /// Equality blind index digest.
    Binary(Vec<u8>),
    /// Order-revealing prefix blocks.
    OreArray(Vec<Vec<u8>>),
    /// Bloom filter bit positions.
    BitMap(Vec<u16>),
    /// No term.
    Null,
}

/// Compute the terms for every index configured on a column, in
/// configuration order.
pub fn terms_for_column(
    keys: &ColumnKeySet,
    config: &ColumnConfig,
    plaintext: &Plaintext,
) -> Result<Vec<IndexTerm>, Error> {
    let mut terms = Vec::with_capacity(config.indexes.len());

    for index in &config.indexes {
        let term = match &index.index_type {
            IndexType::Unique { token_filters } => blind_index(keys, plaintext, token_filters)?,
            IndexType::Ore => IndexTerm::OreArray(ore_blocks(keys, plaintext)?),
            IndexType::Match {
                tokenizer,
                token_filters,
                k,
                m,
                include_original,
            } => match_bits(keys, plaintext, tokenizer, token_filters, *k, *m, *include_original)?,
        };
        terms.push(term);
    }

    Ok(terms)
}

/// HMAC blind index over the normalized plaintext.
pub fn blind_index(
    keys: &ColumnKeySet,
    plaintext: &Plaintext,
    token_filters: &[TokenFilter],
) -> Result<IndexTerm, Error> {
    let normalized = plaintext.index_bytes(token_filters)?;
    let digest = hmac_sha256(&keys.blind_key, &[b"cipherguard/eq/v1", &normalized])?;
    Ok(IndexTerm::Binary(digest.to_vec()))
}

/// Keyed prefix blocks over the order-preserving encoding. Equal values
/// produce equal block sequences; a server-side comparator locates the first
/// differing block to order two encodings.
pub fn ore_blocks(keys: &ColumnKeySet, plaintext: &Plaintext) -> Result<Vec<Vec<u8>>, Error> {
    let encoded = plaintext.order_bytes()?;
    let mut blocks = Vec::with_capacity(encoded.len());

    for i in 0..encoded.len() {
        let block = hmac_sha256(
            &keys.ore_key,
            &[b"cipherguard/ore/v1", &[i as u8], &encoded[..=i]],
        )?;
        blocks.push(block[..ORE_BLOCK_BYTES].to_vec());
    }

    Ok(blocks)
}

/// Bloom-filter bit positions of the tokenized plaintext.
pub fn match_bits(
    keys: &ColumnKeySet,
    plaintext: &Plaintext,
    tokenizer: &Tokenizer,
    token_filters: &[TokenFilter],
    k: usize,
    m: usize,
    include_original: bool,
) -> Result<IndexTerm, Error> {
    let text = apply_filters(&plaintext.storage_string()?, token_filters);
    let positions = bloom_positions(keys, &text, tokenizer, k, m, include_original)?;
    Ok(IndexTerm::BitMap(positions))
}

/// Bit positions for a filtered text, shared by index and query paths.
pub fn bloom_positions(
    keys: &ColumnKeySet,
    text: &str,
    tokenizer: &Tokenizer,
    k: usize,
    m: usize,
    include_original: bool,
) -> Result<Vec<u16>, Error> {
    let mut tokens = tokenize(text, tokenizer);
    if include_original && !text.is_empty() {
        tokens.push(text.to_owned());
    }

    let mut positions = Vec::with_capacity(tokens.len() * k);
    for token in &tokens {
        for round in 0..k {
            let digest = hmac_sha256(
                &keys.match_key,
                &[b"cipherguard/match/v1", &[round as u8], token.as_bytes()],
            )?;
            let position = u16::from_be_bytes([digest[0], digest[1]]) % m as u16;
            positions.push(position);
        }
    }

    positions.sort_unstable();
    positions.dedup();
    Ok(positions)
}

/// Canonical byte serialization of a term sequence, bound into the AEAD
/// associated data so a mutated stored term fails decryption.
pub fn canonical_term_bytes(terms: &[IndexTerm]) -> Vec<u8> {
    let mut out = Vec::new();
    for term in terms {
        match term {
            IndexTerm::Binary(bytes) => {
                out.push(1);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            IndexTerm::OreArray(blocks) => {
                out.push(2);
                out.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
                for block in blocks {
                    out.extend_from_slice(&(block.len() as u32).to_be_bytes());
                    out.extend_from_slice(block);
                }
            }
            IndexTerm::BitMap(bits) => {
                out.push(3);
                out.extend_from_slice(&(bits.len() as u32).to_be_bytes());
                for bit in bits {
                    out.extend_from_slice(&bit.to_be_bytes());
                }
            }
            IndexTerm::Null => out.push(0),
        }
    }
    out
}

fn apply_filters(text: &str, token_filters: &[TokenFilter]) -> String {
    let mut filtered = text.to_owned();
    for filter in token_filters {
        match filter {
            TokenFilter::Downcase => filtered = filtered.to_lowercase(),
        }
    }
    filtered
}

fn tokenize(text: &str, tokenizer: &Tokenizer) -> Vec<String> {
    match tokenizer {
        Tokenizer::Standard => text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect(),
        Tokenizer::Ngram { token_length } => {
            let chars: Vec<char> = text.chars().collect();
            if chars.is_empty() || *token_length == 0 {
                return Vec::new();
            }
            if chars.len() <= *token_length {
                return vec![text.to_owned()];
            }
            chars
                .windows(*token_length)
                .map(|window| window.iter().collect())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Credentials, KeyProvider};
    use crate::schema::Identifier;

    async fn keys() -> ColumnKeySet {
        let provider = KeyProvider::new(&Credentials {
            workspace_id: "w1".to_string(),
            access_key: "ak_test_0123456789".to_string(),
            dataset_id: "d1".to_string(),
        })
        .unwrap();
        provider
            .column_keys(&Identifier::new("users", "email"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn blind_index_is_deterministic() {
        let keys = keys().await;
        let value = Plaintext::Utf8Str("alice@example.com".to_string());

        let a = blind_index(&keys, &value, &[]).unwrap();
        let b = blind_index(&keys, &value, &[]).unwrap();
        assert_eq!(a, b);

        let other = Plaintext::Utf8Str("bob@example.com".to_string());
        assert_ne!(a, blind_index(&keys, &other, &[]).unwrap());
    }

    #[tokio::test]
    async fn ore_blocks_share_prefixes_for_shared_value_prefixes() {
        let keys = keys().await;
        let low = Plaintext::BigInt(100);
        let high = Plaintext::BigInt(200);

        let low_blocks = ore_blocks(&keys, &low).unwrap();
        let high_blocks = ore_blocks(&keys, &high).unwrap();
        assert_eq!(low_blocks.len(), 8);
        assert_eq!(high_blocks.len(), 8);

        // 100 and 200 agree on the first seven big-endian bytes.
        assert_eq!(low_blocks[..7], high_blocks[..7]);
        assert_ne!(low_blocks[7], high_blocks[7]);
    }

    #[tokio::test]
    async fn equal_values_produce_equal_ore_blocks() {
        let keys = keys().await;
        let a = ore_blocks(&keys, &Plaintext::Int(77)).unwrap();
        let b = ore_blocks(&keys, &Plaintext::Int(77)).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn match_bits_contain_query_token_bits() {
        let keys = keys().await;
        let stored = Plaintext::Utf8Str("The quick brown fox".to_string());
        let tokenizer = Tokenizer::Standard;
        let filters = [TokenFilter::Downcase];

        let IndexTerm::BitMap(stored_bits) =
            match_bits(&keys, &stored, &tokenizer, &filters, 6, 2048, false).unwrap()
        else {
            panic!("expected a bitmap term");
        };

        let query_bits = bloom_positions(&keys, "quick", &tokenizer, 6, 2048, false).unwrap();
        assert!(!query_bits.is_empty());
        assert!(query_bits.iter().all(|bit| stored_bits.contains(bit)));

        let absent_bits = bloom_positions(&keys, "zebra", &tokenizer, 6, 2048, false).unwrap();
        assert!(!absent_bits.iter().all(|bit| stored_bits.contains(bit)));
    }

    #[test]
    fn standard_tokenizer_splits_on_non_alphanumeric() {
        let tokens = tokenize("alice@example.com", &Tokenizer::Standard);
        assert_eq!(tokens, vec!["alice", "example", "com"]);
    }

    #[test]
    fn ngram_tokenizer_windows_characters() {
        let tokens = tokenize("abcd", &Tokenizer::Ngram { token_length: 3 });
        assert_eq!(tokens, vec!["abc", "bcd"]);

        let short = tokenize("ab", &Tokenizer::Ngram { token_length: 3 });
        assert_eq!(short, vec!["ab"]);
    }

    #[test]
    fn canonical_term_bytes_distinguish_terms() {
        let a = canonical_term_bytes(&[IndexTerm::Binary(vec![1, 2, 3])]);
        let b = canonical_term_bytes(&[IndexTerm::Binary(vec![1, 2, 4])]);
        let c = canonical_term_bytes(&[IndexTerm::BitMap(vec![258])]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
