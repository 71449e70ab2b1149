//! Middleware for the Raccoon service.
//!
//! # Components
//!
//! - `auth` - Bearer token gate for protected routes
//! - `http_metrics` - HTTP request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{parse_bearer, require_auth, AuthState, ParsedTokenExt};
pub use http_metrics::http_metrics_middleware;
