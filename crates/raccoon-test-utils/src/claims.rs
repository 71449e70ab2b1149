//! Builder for access token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for identity-provider style access token claims.
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaims::new(idp.issuer())
///     .for_user("user-1", "rocky")
///     .with_scope("openid chat/write")
///     .expires_in(300)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestClaims {
    claims: Map<String, Value>,
}

impl TestClaims {
    /// Valid claims for `issuer`: issued now, expiring in an hour.
    pub fn new(issuer: &str) -> Self {
        let now = Utc::now();
        let claims = json!({
            "sub": "test-subject",
            "iss": issuer,
            "exp": (now + Duration::seconds(3600)).timestamp(),
            "iat": now.timestamp(),
            "username": "test-user",
            "client_id": "test-client",
            "token_use": "access",
            "scope": "openid",
        });

        match claims {
            Value::Object(claims) => Self { claims },
            _ => unreachable!("claims literal is an object"),
        }
    }

    pub fn for_user(self, sub: &str, username: &str) -> Self {
        self.set("sub", json!(sub)).set("username", json!(username))
    }

    pub fn with_scope(self, scope: &str) -> Self {
        self.set("scope", json!(scope))
    }

    pub fn with_issuer(self, issuer: &str) -> Self {
        self.set("iss", json!(issuer))
    }

    /// Expiration in seconds from now. Negative values produce expired tokens.
    pub fn expires_in(self, seconds: i64) -> Self {
        self.set("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Not valid until `seconds` from now.
    pub fn not_before_in(self, seconds: i64) -> Self {
        self.set("nbf", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Issued-at `seconds` from now. Positive values are in the future.
    pub fn issued_in(self, seconds: i64) -> Self {
        self.set("iat", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set any claim.
    pub fn set(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Drop a claim entirely.
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}
