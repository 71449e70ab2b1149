//! HTTP routes for the Raccoon service.
//!
//! Defines the Axum router and application state.

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use axum::{
    extract::{ConnectInfo, Request},
    middleware,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Validator built at startup by `auth::initialize`.
    pub validator: Arc<TokenValidator>,
}

/// Build the application routes.
///
/// - `/health` - Liveness probe - public
/// - `/ready` - Readiness probe (key set loaded) - public
/// - `/metrics` - Prometheus metrics - public
/// - `{ws}/chat` - Chat greeting - requires authentication
/// - `{api}/users/me` - Token claims - requires authentication
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        validator: state.validator.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let chat_path = format!("{}/chat", state.config.ws_path_prefix);
    let me_path = format!("{}/users/me", state.config.api_path_prefix);

    let protected_routes = Router::new()
        .route(&chat_path, get(handlers::chat))
        .route(&me_path, get(handlers::get_me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                client = %client_address(request),
            )
        }))
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// Caller address for request logs: the first `X-Forwarded-For` hop when
/// present, else the TCP peer.
fn client_address(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_client_address_prefers_forwarded_for() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_address(&request), "203.0.113.7");
    }

    #[test]
    fn test_client_address_falls_back_to_peer() {
        let mut request = axum::http::Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 51000))));

        assert_eq!(client_address(&request), "192.0.2.4");
    }

    #[test]
    fn test_client_address_unknown() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", " ")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_address(&request), "-");
    }
}
