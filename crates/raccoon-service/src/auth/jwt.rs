//! Bearer token verification.
//!
//! # Security
//!
//! - Tokens are size-checked before parsing
//! - Only RS256 is accepted, whatever the header claims
//! - `exp` and `iss` are required; `nbf` and `iat` are checked when present
//! - Rejections carry a bounded reason for logs and metrics, never for clients

use crate::auth::claims::{Claims, ParsedToken};
use crate::auth::jwk::PublicKey;
use crate::auth::key_set::KeySetError;
use crate::auth::refresh::{KeyLookup, RefreshCoordinator};
use crate::observability::metrics;
use common::jwt::{extract_kid, validate_iat, JwtValidationError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    TooLarge,
    Malformed,
    MissingKid,
    UnknownKey,
    Signature,
    Expired,
    NotYetValid,
    IssuedInFuture,
    Issuer,
    Algorithm,
    MissingClaim,
    KeyRejected,
}

impl InvalidReason {
    /// Label used for the `outcome` metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::TooLarge => "too_large",
            InvalidReason::Malformed => "malformed",
            InvalidReason::MissingKid => "missing_kid",
            InvalidReason::UnknownKey => "unknown_key",
            InvalidReason::Signature => "bad_signature",
            InvalidReason::Expired => "expired",
            InvalidReason::NotYetValid => "not_yet_valid",
            InvalidReason::IssuedInFuture => "issued_in_future",
            InvalidReason::Issuer => "wrong_issuer",
            InvalidReason::Algorithm => "wrong_algorithm",
            InvalidReason::MissingClaim => "missing_claim",
            InvalidReason::KeyRejected => "key_rejected",
        }
    }
}

impl From<JwtValidationError> for InvalidReason {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge => InvalidReason::TooLarge,
            JwtValidationError::MalformedToken => InvalidReason::Malformed,
            JwtValidationError::MissingKid => InvalidReason::MissingKid,
            JwtValidationError::IatTooFarInFuture => InvalidReason::IssuedInFuture,
        }
    }
}

/// Outcome of validating a token that did not hit a server fault.
#[derive(Debug, Clone)]
pub enum TokenVerdict {
    Valid(ParsedToken),
    Invalid(InvalidReason),
}

impl TokenVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenVerdict::Valid(_))
    }
}

/// Verifies bearer tokens against the provider's current key set.
pub struct TokenValidator {
    issuer: String,
    coordinator: Arc<RefreshCoordinator>,
    clock_skew: Duration,
}

impl TokenValidator {
    pub fn new(issuer: String, coordinator: Arc<RefreshCoordinator>, clock_skew: Duration) -> Self {
        Self {
            issuer,
            coordinator,
            clock_skew,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Validate a compact-serialized JWT.
    ///
    /// # Errors
    ///
    /// Only when a key refresh was needed and failed. Every problem with the
    /// token itself is `Ok(TokenVerdict::Invalid(_))`.
    #[instrument(skip_all, name = "raccoon.auth.validate")]
    pub async fn validate(&self, token: &str) -> Result<TokenVerdict, KeySetError> {
        let result = self.validate_inner(token).await;

        let outcome = match &result {
            Ok(TokenVerdict::Valid(_)) => "valid",
            Ok(TokenVerdict::Invalid(reason)) => reason.as_str(),
            Err(_) => "error",
        };
        metrics::record_token_validation(outcome);

        result
    }

    async fn validate_inner(&self, token: &str) -> Result<TokenVerdict, KeySetError> {
        let kid = match extract_kid(token) {
            Ok(kid) => kid,
            Err(e) => {
                tracing::debug!(target: "raccoon.auth.jwt", error = ?e, "Token header rejected");
                return Ok(TokenVerdict::Invalid(e.into()));
            }
        };

        let key = match self.coordinator.store().current().get(&kid) {
            Some(key) => {
                metrics::record_key_lookup("hit");
                key
            }
            None => match self.coordinator.resolve_missing(&kid).await? {
                KeyLookup::Found(key) => key,
                KeyLookup::NotFound => {
                    tracing::debug!(target: "raccoon.auth.jwt", kid = %kid, "Token signed by unknown key");
                    return Ok(TokenVerdict::Invalid(InvalidReason::UnknownKey));
                }
            },
        };

        match verify_token(token, &key, &self.issuer, self.clock_skew) {
            Ok(parsed) => {
                tracing::debug!(target: "raccoon.auth.jwt", kid = %kid, "Token validated successfully");
                Ok(TokenVerdict::Valid(parsed))
            }
            Err(reason) => {
                tracing::debug!(
                    target: "raccoon.auth.jwt",
                    kid = %kid,
                    reason = reason.as_str(),
                    "Token verification failed"
                );
                Ok(TokenVerdict::Invalid(reason))
            }
        }
    }
}

/// Verify signature and claims with a resolved key.
fn verify_token(
    token: &str,
    key: &PublicKey,
    issuer: &str,
    clock_skew: Duration,
) -> Result<ParsedToken, InvalidReason> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = clock_skew.as_secs();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    // Access tokens carry client_id rather than aud
    validation.validate_aud = false;
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "iss"]);

    let token_data = decode::<Claims>(token, key.decoding_key(), &validation)
        .map_err(|e| reason_for(e.kind()))?;

    if let Some(iat) = token_data.claims.iat {
        validate_iat(iat, clock_skew)?;
    }

    Ok(ParsedToken {
        header: token_data.header,
        claims: token_data.claims,
    })
}

fn reason_for(kind: &ErrorKind) -> InvalidReason {
    match kind {
        ErrorKind::InvalidSignature => InvalidReason::Signature,
        ErrorKind::ExpiredSignature => InvalidReason::Expired,
        ErrorKind::ImmatureSignature => InvalidReason::NotYetValid,
        ErrorKind::InvalidIssuer => InvalidReason::Issuer,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::MissingAlgorithm
        | ErrorKind::InvalidAlgorithmName => InvalidReason::Algorithm,
        ErrorKind::MissingRequiredClaim(_) => InvalidReason::MissingClaim,
        ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::Crypto(_) => InvalidReason::KeyRejected,
        _ => InvalidReason::Malformed,
    }
}
