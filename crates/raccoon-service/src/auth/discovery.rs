//! OpenID provider metadata discovery.
//!
//! Fetched once at startup. The issuer it reports is the only value every
//! accepted token's `iss` claim is compared against.

use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

/// The subset of the OpenID configuration document this service uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,

    /// Advertised JWKS location. Informational; the configured `JWKS_URL` is
    /// what gets fetched.
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Discovery endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Discovery document is invalid: {0}")]
    Parse(String),

    #[error("Discovery document has an empty issuer")]
    EmptyIssuer,
}

/// Fetch and validate the provider metadata.
///
/// # Errors
///
/// Transport failure, non-2xx status, unparseable JSON or a blank issuer.
#[instrument(skip(http_client), name = "raccoon.auth.discovery")]
pub async fn load_provider_metadata(
    http_client: &reqwest::Client,
    url: &str,
) -> Result<ProviderMetadata, DiscoveryError> {
    let response = http_client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::Status(status.as_u16()));
    }

    let body = response.bytes().await?;
    let metadata: ProviderMetadata =
        serde_json::from_slice(&body).map_err(|e| DiscoveryError::Parse(e.to_string()))?;

    if metadata.issuer.trim().is_empty() {
        return Err(DiscoveryError::EmptyIssuer);
    }

    tracing::info!(
        target: "raccoon.auth.discovery",
        issuer = %metadata.issuer,
        jwks_uri = metadata.jwks_uri.as_deref().unwrap_or("-"),
        "Loaded identity provider metadata"
    );

    Ok(metadata)
}
