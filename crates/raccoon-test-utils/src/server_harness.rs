//! Test server harness for E2E testing
//!
//! Provides `TestRaccoonServer` for spawning real Raccoon server instances in tests.

use crate::identity_provider::MockIdentityProvider;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use raccoon_service::auth::{self, TokenValidator};
use raccoon_service::config::Config;
use raccoon_service::observability::metrics::init_metrics_recorder;
use raccoon_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

/// Global metrics handle shared by every test server in the process.
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Test harness for spawning the Raccoon service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let idp = MockIdentityProvider::start(&[&TestKeypair::primary()]).await;
/// let server = TestRaccoonServer::spawn(&idp).await?;
///
/// let response = reqwest::get(format!("{}/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestRaccoonServer {
    addr: SocketAddr,
    config: Config,
    validator: Arc<TokenValidator>,
    handle: JoinHandle<()>,
}

impl TestRaccoonServer {
    /// Spawn a server against `idp` with default configuration.
    pub async fn spawn(idp: &MockIdentityProvider) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(idp, &[]).await
    }

    /// Spawn a server with extra configuration variables, e.g.
    /// `("JWKS_REFRESH_COOLDOWN_SECONDS", "0")`.
    ///
    /// The server will:
    /// - Run discovery and the initial JWKS load against `idp`
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(
        idp: &MockIdentityProvider,
        extra_vars: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("OPENID_CONFIGURATION_URL".to_string(), idp.discovery_url()),
            ("JWKS_URL".to_string(), idp.jwks_url()),
        ]);
        for (name, value) in extra_vars {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let validator = Arc::new(
            auth::initialize(&config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize auth: {}", e))?,
        );

        let state = Arc::new(AppState {
            config: config.clone(),
            validator: validator.clone(),
        });
        let app = routes::build_routes(state, test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            validator,
            handle,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:54321`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The validator behind the running server, for inspecting the key set.
    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// URL of the authenticated claims endpoint.
    pub fn me_url(&self) -> String {
        format!("{}{}/users/me", self.url(), self.config.api_path_prefix)
    }

    /// URL of the authenticated chat endpoint.
    pub fn chat_url(&self) -> String {
        format!("{}{}/chat", self.url(), self.config.ws_path_prefix)
    }
}

impl Drop for TestRaccoonServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
