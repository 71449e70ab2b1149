//! Key rotation integration tests.
//!
//! Exercises the refresh policy end to end: cooldown, rotation, unknown keys
//! after a refresh, coalescing and provider failures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use futures::future::join_all;
use raccoon_test_utils::{MockIdentityProvider, TestClaims, TestKeypair, TestRaccoonServer};
use reqwest::StatusCode;
use std::time::Duration;

const NO_COOLDOWN: &[(&str, &str)] = &[("JWKS_REFRESH_COOLDOWN_SECONDS", "0")];

async fn status_for(server: &TestRaccoonServer, token: &str) -> Result<StatusCode> {
    Ok(reqwest::Client::new()
        .get(server.me_url())
        .bearer_auth(token)
        .send()
        .await?
        .status())
}

#[tokio::test]
async fn test_startup_loads_keys_once() -> Result<()> {
    let primary = TestKeypair::primary();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn(&idp).await?;

    let token = primary.sign(&TestClaims::new(idp.issuer()).build());
    for _ in 0..3 {
        assert_eq!(status_for(&server, &token).await?, StatusCode::OK);
    }

    assert_eq!(idp.jwks_request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_within_cooldown_does_not_fetch() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn(&idp).await?;

    // Published upstream, but the startup load is still within the 1h cooldown
    idp.set_keys(&[&primary, &rotated]);
    let token = rotated.sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(status_for(&server, &token).await?, StatusCode::UNAUTHORIZED);
    assert_eq!(idp.jwks_request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_rotated_key_is_picked_up_after_cooldown() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    idp.set_keys(&[&rotated]);
    let token = rotated.sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(status_for(&server, &token).await?, StatusCode::OK);
    assert_eq!(idp.jwks_request_count(), 2);

    let key_set = server.validator().coordinator().store().current();
    assert!(key_set.contains(rotated.kid()));
    assert!(!key_set.contains(primary.kid()));

    // Now cached
    assert_eq!(status_for(&server, &token).await?, StatusCode::OK);
    assert_eq!(idp.jwks_request_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_kid_missing_after_refresh_is_unauthorized() -> Result<()> {
    let primary = TestKeypair::primary();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    let ghost = TestKeypair::rotated().with_kid("never-published");
    let token = ghost.sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(status_for(&server, &token).await?, StatusCode::UNAUTHORIZED);
    assert_eq!(idp.jwks_request_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_misses_share_one_fetch() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    idp.set_keys(&[&primary, &rotated]);
    idp.set_jwks_delay(Duration::from_millis(300));
    let token = rotated.sign(&TestClaims::new(idp.issuer()).build());

    let statuses = join_all((0..10).map(|_| status_for(&server, &token))).await;

    for status in statuses {
        assert_eq!(status?, StatusCode::OK);
    }
    assert_eq!(idp.jwks_request_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_refresh_failure_is_server_error_and_keeps_old_keys() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    idp.fail_jwks_with(503);
    let unknown = rotated.sign(&TestClaims::new(idp.issuer()).build());

    let response = reqwest::Client::new()
        .get(server.me_url())
        .bearer_auth(&unknown)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"]["message"], "An internal error occurred");

    let known = primary.sign(&TestClaims::new(idp.issuer()).build());
    assert_eq!(status_for(&server, &known).await?, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_malformed_jwks_on_refresh_is_server_error() -> Result<()> {
    let primary = TestKeypair::primary();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    idp.set_jwks_raw("{\"keys\": [");
    let unknown = TestKeypair::rotated().sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(
        status_for(&server, &unknown).await?,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(server
        .validator()
        .coordinator()
        .store()
        .current()
        .contains(primary.kid()));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_keys_are_ignored_on_refresh() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    let mut ec_key = rotated.jwk();
    ec_key["kty"] = "EC".into();
    idp.set_jwks(serde_json::json!({ "keys": [primary.jwk(), ec_key] }));
    let token = rotated.sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(status_for(&server, &token).await?, StatusCode::UNAUTHORIZED);
    assert_eq!(server.validator().coordinator().store().current().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_kidless_non_rsa_key_does_not_break_refresh() -> Result<()> {
    let primary = TestKeypair::primary();
    let rotated = TestKeypair::rotated();
    let idp = MockIdentityProvider::start(&[&primary]).await;
    let server = TestRaccoonServer::spawn_with_vars(&idp, NO_COOLDOWN).await?;

    idp.set_jwks(serde_json::json!({
        "keys": [
            primary.jwk(),
            rotated.jwk(),
            {"kty": "EC", "crv": "P-256", "use": "enc", "x": "AA", "y": "AA"}
        ]
    }));
    let token = rotated.sign(&TestClaims::new(idp.issuer()).build());

    assert_eq!(status_for(&server, &token).await?, StatusCode::OK);
    assert_eq!(server.validator().coordinator().store().current().len(), 2);
    Ok(())
}
