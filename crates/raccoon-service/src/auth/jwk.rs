//! JWK decoding into RSA verification keys.
//!
//! Each published key record carries its modulus `n` and exponent `e` as
//! base64url (no padding) big-endian unsigned integers. Only records with
//! `alg = "RS256"`, `kty = "RSA"` and a non-empty `kid` are kept. Anything
//! else is skipped, including records of other types that omit `kid`.
//!
//! A record whose `n` or `e` does not decode fails the whole key set, so a
//! corrupt payload never produces a partially populated set.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use rsa::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Only algorithm accepted for published keys.
pub const SUPPORTED_ALG: &str = "RS256";

/// Only key type accepted for published keys.
pub const SUPPORTED_KTY: &str = "RSA";

/// One entry of a JWKS document, as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkRecord {
    /// Key ID, matched against the token header `kid`. Optional in a JWKS.
    #[serde(default)]
    pub kid: String,

    /// Modulus, base64url encoded.
    #[serde(default)]
    pub n: String,

    /// Public exponent, base64url encoded.
    #[serde(default)]
    pub e: String,

    #[serde(default)]
    pub alg: String,

    #[serde(default)]
    pub kty: String,

    /// Key use (`sig`). Informational only.
    #[serde(default, rename = "use")]
    pub key_use: String,
}

impl JwkRecord {
    /// Whether this record passes the algorithm/type filter.
    pub fn is_supported(&self) -> bool {
        self.alg == SUPPORTED_ALG && self.kty == SUPPORTED_KTY
    }
}

/// A JWKS document: `{"keys": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSetDocument {
    pub keys: Vec<JwkRecord>,
}

/// Errors decoding the numeric components of a key record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("key {kid}: modulus is not valid base64url: {source}")]
    InvalidModulus {
        kid: String,
        source: base64::DecodeError,
    },

    #[error("key {kid}: exponent is not valid base64url: {source}")]
    InvalidExponent {
        kid: String,
        source: base64::DecodeError,
    },

    #[error("key {kid}: exponent is {len} bytes, at most 4 are supported")]
    ExponentTooLong { kid: String, len: usize },

    #[error("key {kid}: empty modulus")]
    EmptyModulus { kid: String },

    #[error("key {kid}: empty exponent")]
    EmptyExponent { kid: String },
}

/// RSA public key rebuilt from a key record.
///
/// Equality is the (modulus, exponent) pair. The prepared `decoding_key`
/// is derived from those two values.
#[derive(Clone)]
pub struct PublicKey {
    modulus: BigUint,
    exponent: u32,
    decoding_key: DecodingKey,
}

impl PublicKey {
    /// Build a key from its numeric components.
    pub fn from_components(modulus: BigUint, exponent: u32) -> Self {
        let decoding_key =
            DecodingKey::from_rsa_raw_components(&modulus.to_bytes_be(), &minimal_be(exponent));
        Self {
            modulus,
            exponent,
            decoding_key,
        }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// Key prepared for `jsonwebtoken::decode`.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u64 {
        self.modulus.bits() as u64
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.modulus == other.modulus && self.exponent == other.exponent
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .field("exponent", &self.exponent)
            .finish()
    }
}

/// Decode one record.
///
/// Returns `Ok(None)` for records that are not RS256/RSA, and for RS256
/// records without a `kid` since no token header can select them.
pub fn decode_key(record: &JwkRecord) -> Result<Option<PublicKey>, DecodeError> {
    if !record.is_supported() {
        tracing::debug!(
            target: "raccoon.auth.jwks",
            kid = %record.kid,
            alg = %record.alg,
            kty = %record.kty,
            "Skipping unsupported key"
        );
        return Ok(None);
    }

    if record.kid.is_empty() {
        tracing::debug!(target: "raccoon.auth.jwks", "Skipping RS256 key without kid");
        return Ok(None);
    }

    let modulus_bytes =
        URL_SAFE_NO_PAD
            .decode(&record.n)
            .map_err(|source| DecodeError::InvalidModulus {
                kid: record.kid.clone(),
                source,
            })?;
    if modulus_bytes.is_empty() {
        return Err(DecodeError::EmptyModulus {
            kid: record.kid.clone(),
        });
    }

    let exponent_bytes =
        URL_SAFE_NO_PAD
            .decode(&record.e)
            .map_err(|source| DecodeError::InvalidExponent {
                kid: record.kid.clone(),
                source,
            })?;
    let exponent = exponent_from_be(&exponent_bytes).map_err(|len| match len {
        0 => DecodeError::EmptyExponent {
            kid: record.kid.clone(),
        },
        len => DecodeError::ExponentTooLong {
            kid: record.kid.clone(),
            len,
        },
    })?;

    Ok(Some(PublicKey::from_components(
        BigUint::from_bytes_be(&modulus_bytes),
        exponent,
    )))
}

/// Decode every record into a `kid -> key` map.
///
/// The first record that fails to decode fails the whole set. When two
/// supported records share a `kid`, the later one wins.
pub fn decode_key_set(
    records: &[JwkRecord],
) -> Result<HashMap<String, Arc<PublicKey>>, DecodeError> {
    let mut keys = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(key) = decode_key(record)? {
            keys.insert(record.kid.clone(), Arc::new(key));
        }
    }
    Ok(keys)
}

/// Encode a big-endian integer the way JWK `n` and `e` are published.
pub fn encode_component(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Left-pad `bytes` to four and read them big-endian. `Err` carries the
/// offending length when it is 0 or above 4.
fn exponent_from_be(bytes: &[u8]) -> Result<u32, usize> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(bytes.len());
    }
    let mut padded = [0u8; 4];
    let offset = 4 - bytes.len();
    for (slot, byte) in padded.iter_mut().skip(offset).zip(bytes) {
        *slot = *byte;
    }
    Ok(u32::from_be_bytes(padded))
}

/// Big-endian bytes of `value` without leading zeros.
fn minimal_be(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes.iter().skip(first).copied().collect()
}
