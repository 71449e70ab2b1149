//! Chat entry point.

use crate::auth::ParsedToken;
use axum::Extension;
use tracing::instrument;

/// Handler for GET `{WS_PATH_PREFIX}/chat`.
///
/// Placeholder greeting. Reaching it proves the caller holds a valid token.
#[instrument(skip_all, name = "raccoon.handlers.chat")]
pub async fn chat(Extension(token): Extension<ParsedToken>) -> &'static str {
    tracing::debug!(
        target: "raccoon.handlers.chat",
        client_id = token.claims.client_id.as_deref().unwrap_or("-"),
        "Chat greeting"
    );
    "Hello"
}
