//! JWKS fetching and coalesced refresh on unknown key IDs.
//!
//! A token naming a `kid` that is not in the current key set either refers
//! to a freshly rotated key or is bogus. [`RefreshCoordinator`] tells the two
//! apart without hammering the identity provider:
//!
//! - Inside the cooldown window since the last refresh, a miss is simply
//!   "not found". No fetch happens.
//! - Past the cooldown, one fetch runs per key set fingerprint. Every caller
//!   that misses against the same set waits on that one fetch and sees the
//!   same outcome.
//!
//! The fetch runs in its own task with a fixed timeout. A waiter that gives
//! up only drops its handle. The fetch still completes and publishes.

use crate::auth::jwk::{decode_key_set, JwkSetDocument, PublicKey};
use crate::auth::key_set::{Fingerprint, KeySet, KeySetError, KeySetStore};
use crate::observability::metrics;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

/// Upper bound for one refresh, independent of any request deadline.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the identity provider's JWKS endpoint.
#[derive(Debug, Clone)]
pub struct JwksFetcher {
    jwks_url: String,
    http_client: reqwest::Client,
}

impl JwksFetcher {
    pub fn new(jwks_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "raccoon.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self::with_client(jwks_url, http_client)
    }

    pub fn with_client(jwks_url: String, http_client: reqwest::Client) -> Self {
        Self {
            jwks_url,
            http_client,
        }
    }

    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Shared with discovery so startup uses one connection pool.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Fetch, fingerprint, parse and decode the published key set.
    #[instrument(skip_all, name = "raccoon.auth.jwks.fetch")]
    pub async fn fetch(&self) -> Result<KeySet, KeySetError> {
        tracing::debug!(target: "raccoon.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| KeySetError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeySetError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| KeySetError::Fetch(e.to_string()))?;

        let fingerprint = Fingerprint::of(&body);
        let document: JwkSetDocument =
            serde_json::from_slice(&body).map_err(|e| KeySetError::Parse(e.to_string()))?;
        let keys = decode_key_set(&document.keys)?;
        let key_set = KeySet::new(keys, fingerprint, Utc::now());

        tracing::debug!(
            target: "raccoon.auth.jwks",
            published = document.keys.len(),
            accepted = key_set.len(),
            kids = ?key_set.kids().collect::<Vec<_>>(),
            fingerprint = %key_set.fingerprint(),
            "JWKS decoded"
        );

        Ok(key_set)
    }
}

/// Result of resolving a `kid` that missed the key set snapshot.
#[derive(Debug, Clone)]
pub enum KeyLookup {
    Found(Arc<PublicKey>),
    NotFound,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<KeySet>, KeySetError>>>;

/// Decides when a miss may refresh and coalesces concurrent refreshes.
pub struct RefreshCoordinator {
    store: Arc<KeySetStore>,
    fetcher: JwksFetcher,
    cooldown: Duration,
    refresh_timeout: Duration,
    inflight: Arc<Mutex<HashMap<Fingerprint, SharedRefresh>>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<KeySetStore>, fetcher: JwksFetcher, cooldown: Duration) -> Self {
        Self {
            store,
            fetcher,
            cooldown,
            refresh_timeout: REFRESH_TIMEOUT,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch the initial key set and build a coordinator around it.
    ///
    /// # Errors
    ///
    /// Any fetch, parse, decode or timeout failure. Startup treats this as fatal.
    pub async fn bootstrap(fetcher: JwksFetcher, cooldown: Duration) -> Result<Self, KeySetError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(REFRESH_TIMEOUT, fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(KeySetError::Timeout(REFRESH_TIMEOUT)),
        };
        record_refresh_outcome(outcome.as_ref(), started.elapsed());

        let key_set = outcome?;
        tracing::info!(
            target: "raccoon.auth.jwks",
            key_count = key_set.len(),
            fingerprint = %key_set.fingerprint(),
            "Initial JWKS loaded"
        );

        Ok(Self::new(
            Arc::new(KeySetStore::new(key_set)),
            fetcher,
            cooldown,
        ))
    }

    /// Override the per-refresh timeout.
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn store(&self) -> &Arc<KeySetStore> {
        &self.store
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Resolve a `kid` that was not in the caller's snapshot.
    ///
    /// # Errors
    ///
    /// The error of the shared refresh when one ran and failed. A `kid` that
    /// is still absent after a successful refresh is `Ok(KeyLookup::NotFound)`.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve_missing(&self, kid: &str) -> Result<KeyLookup, KeySetError> {
        let snapshot = self.store.current();
        if let Some(key) = snapshot.get(kid) {
            metrics::record_key_lookup("hit");
            return Ok(KeyLookup::Found(key));
        }

        if !snapshot.cooldown_elapsed(self.cooldown) {
            tracing::debug!(
                target: "raccoon.auth.jwks",
                kid = %kid,
                refreshed_at = %snapshot.refreshed_at(),
                "Unknown key, JWKS refreshed recently"
            );
            metrics::record_key_lookup("cooldown");
            return Ok(KeyLookup::NotFound);
        }

        let refresh = {
            let mut inflight = self.inflight.lock().await;

            // Re-read under the lock: another caller may have published a
            // newer set between our snapshot and now.
            let latest = self.store.current();
            if let Some(key) = latest.get(kid) {
                metrics::record_key_lookup("hit");
                return Ok(KeyLookup::Found(key));
            }

            if let Some(existing) = inflight.get(latest.fingerprint()).cloned() {
                tracing::debug!(
                    target: "raccoon.auth.jwks",
                    fingerprint = %latest.fingerprint(),
                    "Joining in-flight JWKS refresh"
                );
                existing
            } else if !latest.cooldown_elapsed(self.cooldown) {
                metrics::record_key_lookup("cooldown");
                return Ok(KeyLookup::NotFound);
            } else {
                let refresh = self.spawn_refresh(latest.fingerprint().clone());
                inflight.insert(latest.fingerprint().clone(), refresh.clone());
                refresh
            }
        };

        if let Err(e) = refresh.await {
            metrics::record_key_lookup("error");
            return Err(e);
        }

        match self.store.current().get(kid) {
            Some(key) => {
                metrics::record_key_lookup("refreshed");
                Ok(KeyLookup::Found(key))
            }
            None => {
                tracing::info!(
                    target: "raccoon.auth.jwks",
                    kid = %kid,
                    "Key not found in JWKS after refresh"
                );
                metrics::record_key_lookup("not_found");
                Ok(KeyLookup::NotFound)
            }
        }
    }

    /// Start a refresh task for the set identified by `fingerprint`.
    ///
    /// Must be called with the registry lock held. The task removes its own
    /// entry once the outcome is published, which cannot happen before the
    /// caller has inserted it.
    fn spawn_refresh(&self, fingerprint: Fingerprint) -> SharedRefresh {
        let store = Arc::clone(&self.store);
        let fetcher = self.fetcher.clone();
        let inflight = Arc::clone(&self.inflight);
        let refresh_timeout = self.refresh_timeout;

        tracing::info!(
            target: "raccoon.auth.jwks",
            fingerprint = %fingerprint,
            "Refreshing JWKS"
        );

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(refresh_timeout, fetcher.fetch()).await {
                Ok(Ok(key_set)) => Ok(store.replace(key_set)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(KeySetError::Timeout(refresh_timeout)),
            };
            record_refresh_outcome(
                outcome.as_ref().map(|key_set| &**key_set),
                started.elapsed(),
            );

            inflight.lock().await.remove(&fingerprint);
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(KeySetError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

fn record_refresh_outcome(outcome: Result<&KeySet, &KeySetError>, duration: Duration) {
    match outcome {
        Ok(key_set) => {
            tracing::info!(
                target: "raccoon.auth.jwks",
                key_count = key_set.len(),
                fingerprint = %key_set.fingerprint(),
                duration_ms = duration.as_millis() as u64,
                "JWKS refreshed"
            );
            metrics::record_jwks_refresh("success", None, duration);
            metrics::set_jwks_keys(key_set.len());
        }
        Err(e) => {
            tracing::error!(
                target: "raccoon.auth.jwks",
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "JWKS fetch failed"
            );
            metrics::record_jwks_refresh("error", Some(e.kind()), duration);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwk::{encode_component, JwkRecord};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwk(kid: &str) -> JwkRecord {
        JwkRecord {
            kid: kid.to_string(),
            n: encode_component(&[0xc1, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x09]),
            e: "AQAB".to_string(),
            alg: "RS256".to_string(),
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
        }
    }

    fn jwks_body(kids: &[&str]) -> serde_json::Value {
        let keys: Vec<_> = kids.iter().map(|kid| jwk(kid)).collect();
        serde_json::json!({ "keys": keys })
    }

    async fn mount_jwks(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn stale_store(kids: &[&str]) -> Arc<KeySetStore> {
        let keys = kids
            .iter()
            .map(|kid| {
                let key = crate::auth::jwk::decode_key(&jwk(kid)).unwrap().unwrap();
                (kid.to_string(), Arc::new(key))
            })
            .collect();
        Arc::new(KeySetStore::new(KeySet::new(
            keys,
            Fingerprint::of(b"stale"),
            Utc::now() - chrono::Duration::hours(2),
        )))
    }

    fn fetcher(server: &MockServer) -> JwksFetcher {
        JwksFetcher::new(format!("{}/jwks.json", server.uri()))
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.map_or(0, |r| r.len())
    }

    #[tokio::test]
    async fn test_fetch_filters_and_fingerprints() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "keys": [
                jwk("a"),
                jwk("b"),
                {"kid": "ec", "kty": "EC", "alg": "ES256", "crv": "P-256", "x": "AA", "y": "AA"}
            ]
        });
        let raw = serde_json::to_vec(&body).unwrap();
        mount_jwks(&server, ResponseTemplate::new(200).set_body_bytes(raw.clone())).await;

        let key_set = fetcher(&server).fetch().await.unwrap();

        assert_eq!(key_set.len(), 2);
        assert!(key_set.contains("a"));
        assert!(!key_set.contains("ec"));
        assert_eq!(key_set.fingerprint(), &Fingerprint::of(&raw));
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(503)).await;

        let result = fetcher(&server).fetch().await;
        assert!(matches!(result, Err(KeySetError::Status(503))));
    }

    #[tokio::test]
    async fn test_fetch_malformed_document() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_string("{\"nope\":1}")).await;

        let result = fetcher(&server).fetch().await;
        assert!(matches!(result, Err(KeySetError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_undecodable_key() {
        let server = MockServer::start().await;
        let mut bad = jwk("bad");
        bad.n = "***".to_string();
        mount_jwks(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [bad] })),
        )
        .await;

        let result = fetcher(&server).fetch().await;
        assert!(matches!(result, Err(KeySetError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let result = JwksFetcher::new("http://127.0.0.1:1/jwks.json".to_string())
            .fetch()
            .await;
        assert!(matches!(result, Err(KeySetError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_known_kid_resolves_without_fetch() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_json(jwks_body(&["a"]))).await;

        let coordinator = RefreshCoordinator::new(
            stale_store(&["a"]),
            fetcher(&server),
            Duration::from_secs(3600),
        );

        let lookup = coordinator.resolve_missing("a").await.unwrap();
        assert!(matches!(lookup, KeyLookup::Found(_)));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_miss_within_cooldown_skips_fetch() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_json(jwks_body(&["new"]))).await;

        let store = Arc::new(KeySetStore::new(KeySet::new(
            HashMap::new(),
            Fingerprint::of(b"fresh"),
            Utc::now(),
        )));
        let coordinator =
            RefreshCoordinator::new(store, fetcher(&server), Duration::from_secs(3600));

        let lookup = coordinator.resolve_missing("new").await.unwrap();
        assert!(matches!(lookup, KeyLookup::NotFound));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_miss_after_cooldown_refreshes_and_finds_key() {
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            ResponseTemplate::new(200).set_body_json(jwks_body(&["old", "rotated"])),
        )
        .await;

        let coordinator = RefreshCoordinator::new(
            stale_store(&["old"]),
            fetcher(&server),
            Duration::from_secs(3600),
        );

        let lookup = coordinator.resolve_missing("rotated").await.unwrap();

        assert!(matches!(lookup, KeyLookup::Found(_)));
        assert_eq!(request_count(&server).await, 1);
        assert_eq!(coordinator.store().current().len(), 2);
    }

    #[tokio::test]
    async fn test_still_missing_after_refresh_is_not_found() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_json(jwks_body(&["old"]))).await;

        let coordinator = RefreshCoordinator::new(
            stale_store(&["old"]),
            fetcher(&server),
            Duration::from_secs(3600),
        );

        let lookup = coordinator.resolve_missing("bogus").await.unwrap();
        assert!(matches!(lookup, KeyLookup::NotFound));

        // The refresh reset the cooldown, so a second bogus kid does not fetch.
        let lookup = coordinator.resolve_missing("bogus-2").await.unwrap();
        assert!(matches!(lookup, KeyLookup::NotFound));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&["old", "rotated"]))
                .set_delay(Duration::from_millis(200)),
        )
        .await;

        let coordinator = Arc::new(RefreshCoordinator::new(
            stale_store(&["old"]),
            fetcher(&server),
            Duration::from_secs(3600),
        ));

        let lookups = futures::future::join_all((0..16).map(|_| {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.resolve_missing("rotated").await }
        }))
        .await;

        assert_eq!(request_count(&server).await, 1);
        for lookup in lookups {
            assert!(matches!(lookup, Ok(KeyLookup::Found(_))));
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_failure() {
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            ResponseTemplate::new(500).set_delay(Duration::from_millis(200)),
        )
        .await;

        let store = stale_store(&["old"]);
        let before = store.current();
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            fetcher(&server),
            Duration::from_secs(3600),
        ));

        let lookups = futures::future::join_all((0..8).map(|_| {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.resolve_missing("rotated").await }
        }))
        .await;

        assert_eq!(request_count(&server).await, 1);
        for lookup in lookups {
            assert!(matches!(lookup, Err(KeySetError::Status(500))));
        }
        // Stale set stays authoritative.
        assert!(Arc::ptr_eq(&before, &store.current()));
    }

    #[tokio::test]
    async fn test_refresh_timeout_is_an_error() {
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&["rotated"]))
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let coordinator = RefreshCoordinator::new(
            stale_store(&["old"]),
            fetcher(&server),
            Duration::from_secs(3600),
        )
        .with_refresh_timeout(Duration::from_millis(100));

        let result = coordinator.resolve_missing("rotated").await;
        assert!(matches!(result, Err(KeySetError::Timeout(_))));
        assert!(coordinator.store().current().contains("old"));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_refresh() {
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(&["old", "rotated"]))
                .set_delay(Duration::from_millis(300)),
        )
        .await;

        let coordinator = Arc::new(RefreshCoordinator::new(
            stale_store(&["old"]),
            fetcher(&server),
            Duration::from_secs(3600),
        ));

        // Give up long before the fetch completes.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), coordinator.resolve_missing("rotated"))
                .await;
        assert!(abandoned.is_err());

        // The detached refresh still lands.
        let mut published = false;
        for _ in 0..50 {
            if coordinator.store().current().contains("rotated") {
                published = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(published, "refresh should complete without its waiter");
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_loads_initial_set() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_json(jwks_body(&["a", "b"]))).await;

        let coordinator = RefreshCoordinator::bootstrap(fetcher(&server), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(coordinator.store().current().len(), 2);
        assert_eq!(coordinator.cooldown(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_on_bad_document() {
        let server = MockServer::start().await;
        mount_jwks(&server, ResponseTemplate::new(200).set_body_string("not json")).await;

        let result = RefreshCoordinator::bootstrap(fetcher(&server), Duration::from_secs(60)).await;
        assert!(matches!(result, Err(KeySetError::Parse(_))));
    }
}
