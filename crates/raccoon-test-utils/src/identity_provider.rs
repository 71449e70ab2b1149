//! Mock OpenID provider serving a discovery document and a JWKS.
//!
//! The JWKS response is read from shared state on every request, so tests
//! can rotate keys or inject failures without resetting the mock server and
//! losing the request count.

use crate::keys::{jwks_document, TestKeypair};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

#[derive(Debug, Clone)]
enum JwksBehaviour {
    Serve(Value),
    Raw(String),
    Status(u16),
}

struct JwksState {
    behaviour: JwksBehaviour,
    delay: Duration,
}

#[derive(Clone)]
struct JwksResponder {
    state: Arc<Mutex<JwksState>>,
    requests: Arc<AtomicUsize>,
}

impl Respond for JwksResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        let template = match &state.behaviour {
            JwksBehaviour::Serve(document) => ResponseTemplate::new(200).set_body_json(document),
            JwksBehaviour::Raw(body) => ResponseTemplate::new(200)
                .set_body_raw(body.clone().into_bytes(), "application/json"),
            JwksBehaviour::Status(status) => ResponseTemplate::new(*status),
        };
        template.set_delay(state.delay)
    }
}

#[derive(Clone)]
struct DiscoveryResponder {
    status: Arc<Mutex<Option<u16>>>,
    document: Value,
}

impl Respond for DiscoveryResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        match *self.status.lock().unwrap() {
            Some(status) => ResponseTemplate::new(status),
            None => ResponseTemplate::new(200).set_body_json(&self.document),
        }
    }
}

/// A wiremock server standing in for the identity provider.
pub struct MockIdentityProvider {
    server: MockServer,
    issuer: String,
    jwks: Arc<Mutex<JwksState>>,
    jwks_requests: Arc<AtomicUsize>,
    discovery_status: Arc<Mutex<Option<u16>>>,
}

impl MockIdentityProvider {
    /// Start a provider publishing `keys`.
    pub async fn start(keys: &[&TestKeypair]) -> Self {
        let server = MockServer::start().await;
        let issuer = format!("{}/test-pool", server.uri());

        let jwks = Arc::new(Mutex::new(JwksState {
            behaviour: JwksBehaviour::Serve(jwks_document(keys)),
            delay: Duration::ZERO,
        }));
        let jwks_requests = Arc::new(AtomicUsize::new(0));
        let discovery_status = Arc::new(Mutex::new(None));

        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(DiscoveryResponder {
                status: discovery_status.clone(),
                document: json!({
                    "issuer": issuer,
                    "jwks_uri": format!("{}{}", server.uri(), JWKS_PATH),
                    "response_types_supported": ["code", "token"],
                    "id_token_signing_alg_values_supported": ["RS256"],
                }),
            })
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(JwksResponder {
                state: jwks.clone(),
                requests: jwks_requests.clone(),
            })
            .mount(&server)
            .await;

        Self {
            server,
            issuer,
            jwks,
            jwks_requests,
            discovery_status,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Issuer reported by the discovery document.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.server.uri(), DISCOVERY_PATH)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Publish a new set of keys.
    pub fn set_keys(&self, keys: &[&TestKeypair]) {
        self.set_jwks(jwks_document(keys));
    }

    /// Publish an arbitrary JWKS document.
    pub fn set_jwks(&self, document: Value) {
        self.jwks.lock().unwrap().behaviour = JwksBehaviour::Serve(document);
    }

    /// Serve `body` verbatim as the JWKS.
    pub fn set_jwks_raw(&self, body: &str) {
        self.jwks.lock().unwrap().behaviour = JwksBehaviour::Raw(body.to_string());
    }

    /// Answer JWKS requests with an empty response of `status`.
    pub fn fail_jwks_with(&self, status: u16) {
        self.jwks.lock().unwrap().behaviour = JwksBehaviour::Status(status);
    }

    /// Delay every JWKS response.
    pub fn set_jwks_delay(&self, delay: Duration) {
        self.jwks.lock().unwrap().delay = delay;
    }

    /// Answer discovery requests with an empty response of `status`.
    pub fn fail_discovery_with(&self, status: u16) {
        *self.discovery_status.lock().unwrap() = Some(status);
    }

    /// Number of JWKS requests served so far.
    pub fn jwks_request_count(&self) -> usize {
        self.jwks_requests.load(Ordering::SeqCst)
    }
}
