//! Router setup with all API routes and middleware.

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use citypulse_core::config::CityPulseConfig;
use citypulse_core::error::CityPulseError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Chat bodies are small; anything larger is rejected before parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let limiter = RateLimiter::new(state.config.general.rate_limit_per_sec);
    // Turns beyond this wait for a slot instead of piling onto the
    // collaborators.
    let max_turns = state.config.pipeline.max_concurrent_calls.max(1) * 4;

    let chat_routes = Router::new()
        .route(
            "/chat",
            post(handlers::chat).layer(ConcurrencyLimitLayer::new(max_turns)),
        )
        .route("/generate_session_id", post(handlers::generate_session_id))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(chat_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind to the configured port on localhost and serve until the process
/// is stopped.
pub async fn start_server(config: &CityPulseConfig, state: AppState) -> Result<(), CityPulseError> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CityPulseError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
        .map_err(|e| CityPulseError::Api(format!("Server error: {}", e)))
}
