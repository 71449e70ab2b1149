//! Current user handler.
//!
//! Returns the identity carried by the verified access token.

use crate::auth::ParsedToken;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `{API_PATH_PREFIX}/users/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    pub scopes: Vec<String>,

    pub iss: String,

    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl From<ParsedToken> for MeResponse {
    fn from(token: ParsedToken) -> Self {
        let claims = token.claims;
        let scopes = claims.scopes().into_iter().map(str::to_string).collect();

        Self {
            sub: claims.sub,
            username: claims.username,
            client_id: claims.client_id,
            scopes,
            iss: claims.iss,
            exp: claims.exp,
            iat: claims.iat,
        }
    }
}

/// Handler for GET `{API_PATH_PREFIX}/users/me`
///
/// ```json
/// {
///   "sub": "3f7c...",
///   "username": "rocky",
///   "client_id": "app-client",
///   "scopes": ["openid", "profile"],
///   "iss": "https://idp.example.com/pool-1",
///   "exp": 1900000000,
///   "iat": 1899996400
/// }
/// ```
#[instrument(skip_all, name = "raccoon.handlers.me")]
pub async fn get_me(Extension(token): Extension<ParsedToken>) -> Json<MeResponse> {
    tracing::debug!(target: "raccoon.handlers.me", "Returning token claims");
    Json(MeResponse::from(token))
}
