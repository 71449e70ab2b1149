//! Token authentication against the identity provider's JWKS.
//!
//! # Components
//!
//! - `discovery` - Issuer lookup from the OpenID configuration document
//! - `jwk` - JWK records and RSA public key reconstruction
//! - `key_set` - Immutable key set snapshots behind an atomic swap
//! - `refresh` - JWKS fetching and coalesced refresh on unknown `kid`
//! - `claims` - Token claims and the per-request parsed token
//! - `jwt` - Token verification

pub mod claims;
pub mod discovery;
pub mod jwk;
pub mod jwt;
pub mod key_set;
pub mod refresh;

pub use claims::{Claims, ParsedToken};
pub use discovery::{load_provider_metadata, DiscoveryError, ProviderMetadata};
pub use jwk::{decode_key, decode_key_set, DecodeError, JwkRecord, JwkSetDocument, PublicKey};
pub use jwt::{InvalidReason, TokenValidator, TokenVerdict};
pub use key_set::{Fingerprint, KeySet, KeySetError, KeySetStore};
pub use refresh::{JwksFetcher, KeyLookup, RefreshCoordinator, REFRESH_TIMEOUT};

use crate::config::Config;
use std::sync::Arc;
use thiserror::Error;

/// Failure to bring up token validation.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Identity provider discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Initial JWKS load failed: {0}")]
    KeySet(#[from] KeySetError),
}

/// Discover the issuer and load the initial key set.
///
/// # Errors
///
/// Either step failing. The service must not start without both.
pub async fn initialize(config: &Config) -> Result<TokenValidator, StartupError> {
    let fetcher = JwksFetcher::new(config.jwks_url.clone());

    let metadata =
        load_provider_metadata(fetcher.http_client(), &config.openid_configuration_url).await?;

    let coordinator =
        RefreshCoordinator::bootstrap(fetcher, config.jwks_refresh_cooldown()).await?;

    Ok(TokenValidator::new(
        metadata.issuer,
        Arc::new(coordinator),
        config.jwt_clock_skew(),
    ))
}
