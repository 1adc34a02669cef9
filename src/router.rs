use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{error::AppError, handlers, state::AppState};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 16 * 1024;

const RATE_LIMIT_MESSAGE: &str = "Too many security requests, please try again later.";

/// Builds the application router.
///
/// Generation, validation and refresh share a per-client quota keyed on the
/// peer IP, so the server must be run with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: AppState) -> Result<Router> {
    let security_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .period(state.config.rate_limit_replenish_period())
            .burst_size(state.config.rate_limit_max_requests)
            .use_headers()
            .finish()
            .context("Invalid rate limit configuration")?,
    );

    let throttled_routes = Router::new()
        .route("/api/security/generate", post(handlers::security::generate))
        .route("/api/security/validate", post(handlers::security::validate))
        .route("/api/security/refresh", post(handlers::security::refresh))
        .layer(GovernorLayer::new(security_governor_conf).error_handler(rate_limit_response))
        .with_state(state.clone());

    let status_routes = Router::new()
        .route("/api/security/status", get(handlers::security::status))
        .with_state(state.clone());

    let cors = cors_layer(&state.config.allowed_origins)?;

    Ok(Router::new()
        .merge(throttled_routes)
        .merge(status_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors))
}

/// Renders quota rejections in the same JSON shape as every other error,
/// keeping the governor's `retry-after`/`x-ratelimit-*` headers.
fn rate_limit_response(error: GovernorError) -> Response {
    match error {
        GovernorError::TooManyRequests { headers, .. } => {
            let mut response =
                AppError::RateLimitExceeded(RATE_LIMIT_MESSAGE.to_string()).into_response();
            if let Some(headers) = headers {
                response.headers_mut().extend(headers);
            }
            response
        }
        other => AppError::Internal(other.to_string()).into_response(),
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(86400)))
}
