//! Raccoon Service Library
//!
//! HTTP backend for the Raccoon chat application. Every protected route sits
//! behind bearer-token validation against the identity provider's published
//! JSON Web Key Set:
//!
//! - Issuer discovery from the OpenID configuration document at startup
//! - JWKS fetch, RSA key reconstruction and lock-free key set snapshots
//! - Coalesced key refresh on unknown key IDs, with a cooldown
//! - Auth middleware that attaches the verified token to the request
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/jwt.rs -> auth/key_set.rs
//!                                                    -> auth/refresh.rs -> auth/jwk.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Discovery, key decoding, key set store, refresh, token validation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Auth gate and HTTP metrics
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
