//! # Raccoon Test Utilities
//!
//! Shared test utilities for the Raccoon service.
//!
//! This crate provides:
//! - Fixed RSA signing keys (`TestKeypair`)
//! - Claim builders (`TestClaims`)
//! - A wiremock-backed identity provider (`MockIdentityProvider`)
//! - Server test harness (`TestRaccoonServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raccoon_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let key = TestKeypair::primary();
//!     let idp = MockIdentityProvider::start(&[&key]).await;
//!     let server = TestRaccoonServer::spawn(&idp).await?;
//!
//!     let token = key.sign(&TestClaims::new(idp.issuer()).build());
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/users/me", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod identity_provider;
pub mod keys;
pub mod server_harness;

pub use claims::*;
pub use identity_provider::*;
pub use keys::*;
pub use server_harness::*;
