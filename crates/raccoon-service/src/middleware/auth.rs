//! Authentication middleware for protected routes.
//!
//! `require_auth` extracts the bearer token from the Authorization header,
//! validates it and injects the resulting [`ParsedToken`] into request
//! extensions. Rejection is terminal: once a response is chosen the inner
//! service is never called.

use crate::auth::{ParsedToken, TokenValidator, TokenVerdict};
use crate::errors::RaccoonError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::instrument;

/// Client-facing text for every rejected token.
const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<TokenValidator>,
}

/// Parse a `Bearer <token>` header value.
///
/// The value must be visible ASCII and split into exactly two whitespace
/// separated fields, the first of which is exactly `Bearer`.
pub fn parse_bearer(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let mut fields = value.split_whitespace();

    let scheme = fields.next()?;
    let token = fields.next()?;
    if fields.next().is_some() || scheme != "Bearer" {
        return None;
    }

    Some(token)
}

fn extract_bearer_token(req: &Request) -> Result<&str, RaccoonError> {
    let auth_header = req.headers().get(header::AUTHORIZATION).ok_or_else(|| {
        tracing::debug!(target: "raccoon.middleware.auth", "Missing Authorization header");
        RaccoonError::InvalidToken("Missing Authorization header".to_string())
    })?;

    parse_bearer(auth_header).ok_or_else(|| {
        tracing::debug!(target: "raccoon.middleware.auth", "Invalid Authorization header format");
        RaccoonError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 Unauthorized if the header is missing or malformed, or the token is invalid
/// - 500 Internal Server Error if a key refresh was needed and failed
/// - Otherwise continues with `ParsedToken` in extensions
#[instrument(skip_all, name = "raccoon.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RaccoonError> {
    let token = extract_bearer_token(&req)?.to_owned();

    match state.validator.validate(&token).await {
        Ok(TokenVerdict::Valid(parsed)) => {
            req.extensions_mut().insert(parsed);
            Ok(next.run(req).await)
        }
        Ok(TokenVerdict::Invalid(reason)) => {
            tracing::debug!(
                target: "raccoon.middleware.auth",
                reason = reason.as_str(),
                "Rejected bearer token"
            );
            Err(RaccoonError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()))
        }
        Err(e) => {
            tracing::error!(
                target: "raccoon.middleware.auth",
                error = %e,
                error_type = e.kind(),
                "Token validation failed on key refresh"
            );
            Err(RaccoonError::Internal)
        }
    }
}

/// Access to the verified token from a request.
pub trait ParsedTokenExt {
    /// `None` if the auth middleware did not run for this request.
    fn parsed_token(&self) -> Option<&ParsedToken>;
}

impl<B> ParsedTokenExt for axum::extract::Request<B> {
    fn parsed_token(&self) -> Option<&ParsedToken> {
        self.extensions().get::<ParsedToken>()
    }
}
