//! Claims carried by identity-provider access tokens.
//!
//! `sub` and `username` identify a person and are redacted in Debug output.
//! Only `iss` and `exp` are required. Timestamps accept fractional
//! NumericDate values and are truncated toward negative infinity to whole
//! seconds.

use jsonwebtoken::Header;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Claims of a verified access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID). Absent on client-credentials tokens. Redacted in
    /// Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer. Checked against the discovered provider issuer.
    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(deserialize_with = "numeric_date")]
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(
        default,
        deserialize_with = "optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    /// Login name. Redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// App client the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// `access` or `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,

    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Every other claim, untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("token_use", &self.token_use)
            .field("scope", &self.scope)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// NumericDate as whole seconds. Integers pass through, fractional values
/// are floored.
fn numeric_date<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    seconds_of(&number)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid NumericDate: {number}")))
}

fn optional_numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Number>::deserialize(deserializer)? {
        Some(number) => seconds_of(&number)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid NumericDate: {number}"))),
        None => Ok(None),
    }
}

fn seconds_of(number: &serde_json::Number) -> Option<i64> {
    if let Some(seconds) = number.as_i64() {
        return Some(seconds);
    }
    let seconds = number.as_f64()?.floor();
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    if seconds.is_finite() && seconds >= i64::MIN as f64 && seconds < i64::MAX as f64 {
        Some(seconds as i64)
    } else {
        None
    }
}

/// Header and claims of a token that passed verification.
///
/// Owned by the request that produced it and carried in its extensions.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub header: Header,
    pub claims: Claims,
}

impl ParsedToken {
    /// Key ID the token was verified with.
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }
}
