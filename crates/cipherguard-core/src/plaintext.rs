//! Typed plaintext values parsed from the C-string surface per column cast,
//! with canonical storage and order-preserving encodings.

use crate::error::Error;
use crate::schema::{CastAs, TokenFilter};

/// Width of the order encoding for variable-length values (text, dates,
/// canonical JSON). Longer values are compared by their prefix.
const ORDER_PREFIX_LEN: usize = 16;

const I64_SIGN: u64 = 1 << 63;

/// A plaintext value typed according to its column cast.
#[derive(Clone, Debug, PartialEq)]
pub enum Plaintext {
    /// UTF-8 text.
    Utf8Str(String),
    /// Boolean.
    Boolean(bool),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Finite double-precision float.
    Float(f64),
    /// ISO-8601 calendar date, kept in its `YYYY-MM-DD` form.
    Date(String),
    /// JSONB value.
    JsonB(serde_json::Value),
}

impl Plaintext {
    /// Parse a raw string as the given cast type.
    pub fn parse(raw: &str, cast_as: CastAs) -> Result<Self, Error> {
        let invalid = |message: String| Error::InvalidPlaintext {
            cast: cast_as.to_string(),
            message,
        };

        match cast_as {
            CastAs::Text => Ok(Plaintext::Utf8Str(raw.to_owned())),
            CastAs::Boolean => raw
                .parse::<bool>()
                .map(Plaintext::Boolean)
                .map_err(|e| invalid(e.to_string())),
            CastAs::SmallInt => raw
                .trim()
                .parse::<i16>()
                .map(Plaintext::SmallInt)
                .map_err(|e| invalid(e.to_string())),
            CastAs::Int => raw
                .trim()
                .parse::<i32>()
                .map(Plaintext::Int)
                .map_err(|e| invalid(e.to_string())),
            CastAs::BigInt => raw
                .trim()
                .parse::<i64>()
                .map(Plaintext::BigInt)
                .map_err(|e| invalid(e.to_string())),
            CastAs::Real | CastAs::Double => {
                let value = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(e.to_string()))?;
                if !value.is_finite() {
                    return Err(invalid("value must be finite".to_string()));
                }
                Ok(Plaintext::Float(value))
            }
            CastAs::Date => {
                validate_date(raw).map_err(invalid)?;
                Ok(Plaintext::Date(raw.to_owned()))
            }
            CastAs::JsonB => serde_json::from_str(raw)
                .map(Plaintext::JsonB)
                .map_err(|e| invalid(e.to_string())),
        }
    }

    /// The canonical string form sealed inside the AEAD and returned by
    /// decrypt.
    pub fn storage_string(&self) -> Result<String, Error> {
        match self {
            Plaintext::Utf8Str(s) => Ok(s.clone()),
            Plaintext::Boolean(b) => Ok(b.to_string()),
            Plaintext::SmallInt(v) => Ok(v.to_string()),
            Plaintext::Int(v) => Ok(v.to_string()),
            Plaintext::BigInt(v) => Ok(v.to_string()),
            Plaintext::Float(v) => Ok(v.to_string()),
            Plaintext::Date(s) => Ok(s.clone()),
            Plaintext::JsonB(value) => {
                serde_json::to_string(value).map_err(|e| Error::Encoding(e.to_string()))
            }
        }
    }

    /// An order-preserving byte encoding: `a < b` as values implies
    /// `a.order_bytes() < b.order_bytes()` lexicographically (up to the
    /// prefix width for variable-length values).
    pub fn order_bytes(&self) -> Result<Vec<u8>, Error> {
        match self {
            Plaintext::Utf8Str(s) | Plaintext::Date(s) => Ok(prefix_bytes(s.as_bytes())),
            Plaintext::Boolean(b) => Ok(vec![u8::from(*b)]),
            Plaintext::SmallInt(v) => Ok(order_encode_i64(i64::from(*v))),
            Plaintext::Int(v) => Ok(order_encode_i64(i64::from(*v))),
            Plaintext::BigInt(v) => Ok(order_encode_i64(*v)),
            Plaintext::Float(v) => Ok(order_encode_f64(*v)),
            Plaintext::JsonB(_) => Ok(prefix_bytes(self.storage_string()?.as_bytes())),
        }
    }

    /// Normalized bytes hashed into the equality blind index.
    pub fn index_bytes(&self, token_filters: &[TokenFilter]) -> Result<Vec<u8>, Error> {
        let mut normalized = self.storage_string()?;
        for filter in token_filters {
            match filter {
                TokenFilter::Downcase => normalized = normalized.to_lowercase(),
            }
        }
        Ok(normalized.into_bytes())
    }
}

/// Fixed-width prefix encoding for lexicographically ordered values.
fn prefix_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; ORDER_PREFIX_LEN];
    let take = bytes.len().min(ORDER_PREFIX_LEN);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

/// Sign-flipped big-endian encoding: ordered as unsigned bytes.
fn order_encode_i64(value: i64) -> Vec<u8> {
    ((value as u64) ^ I64_SIGN).to_be_bytes().to_vec()
}

/// IEEE-754 total-order trick for finite floats.
fn order_encode_f64(value: f64) -> Vec<u8> {
    let bits = value.to_bits();
    let ordered = if bits & I64_SIGN != 0 {
        !bits
    } else {
        bits | I64_SIGN
    };
    ordered.to_be_bytes().to_vec()
}

fn validate_date(raw: &str) -> Result<(), String> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err("expected `YYYY-MM-DD`".to_string());
    }
    for (i, b) in bytes.iter().enumerate() {
        if i != 4 && i != 7 && !b.is_ascii_digit() {
            return Err("expected `YYYY-MM-DD`".to_string());
        }
    }
    let month: u8 = raw[5..7].parse().map_err(|_| "invalid month".to_string())?;
    let day: u8 = raw[8..10].parse().map_err(|_| "invalid day".to_string())?;
    if !(1..=12).contains(&month) {
        return Err(format!("month {month} out of range"));
    }
    if !(1..=31).contains(&day) {
        return Err(format!("day {day} out of range"));
    }
    Ok(())
}
