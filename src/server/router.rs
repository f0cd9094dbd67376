//! HTTP router for movies-api
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - User registration, activation and authentication tokens
//! - The movie catalog

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::auth::{AuthManager, RateLimiter};
use crate::background::BackgroundTasks;
use crate::config::{Config, Environment};
use crate::database::Database;
use crate::error::AppError;
use crate::notifier::Notifier;

use super::middleware::{
    authenticate_middleware, handle_panic, logging_middleware, rate_limit_middleware,
    server_error_middleware,
};
use super::{movies, users};

/// Maximum accepted request body size
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Shared application state
pub struct AppState<D: Database> {
    /// Authentication manager
    pub auth_manager: Arc<AuthManager<D>>,

    /// Database
    pub database: Arc<D>,

    /// Per-client request limiter
    pub rate_limiter: Arc<RateLimiter>,

    /// Fire-and-forget work started by handlers
    pub background: Arc<BackgroundTasks>,

    /// Activation message delivery
    pub notifier: Arc<dyn Notifier>,

    /// Deployment environment
    pub environment: Environment,

    /// Key rate limiting on proxy headers
    pub trust_proxy_headers: bool,
}

impl<D: Database> AppState<D> {
    /// Wire up state from loaded configuration
    pub fn new(database: Arc<D>, config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            auth_manager: Arc::new(AuthManager::new(
                Arc::clone(&database),
                config.tokens.to_auth_config(),
            )),
            database,
            rate_limiter: Arc::new(RateLimiter::new(config.limiter.to_rate_limit_config())),
            background: Arc::new(BackgroundTasks::new()),
            notifier,
            environment: config.server.environment,
            trust_proxy_headers: config.limiter.trust_proxy_headers,
        }
    }
}

impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            auth_manager: Arc::clone(&self.auth_manager),
            database: Arc::clone(&self.database),
            rate_limiter: Arc::clone(&self.rate_limiter),
            background: Arc::clone(&self.background),
            notifier: Arc::clone(&self.notifier),
            environment: self.environment,
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: String,
}

/// Build the main application router
///
/// Requests pass through, outermost first: tracing, request logging,
/// internal error handling, panic recovery, rate limiting and
/// authentication.
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    Router::new()
        // Health endpoint
        .route("/v1/healthcheck", get(health_handler::<D>))
        // Users and tokens
        .route("/v1/users", post(users::register_user_handler::<D>))
        .route(
            "/v1/users/activated",
            put(users::activate_user_handler::<D>),
        )
        .route(
            "/v1/tokens/authentication",
            post(users::create_authentication_token_handler::<D>)
                .delete(users::revoke_authentication_tokens_handler::<D>),
        )
        // Movies
        .route(
            "/v1/movies",
            get(movies::list_movies_handler::<D>).post(movies::create_movie_handler::<D>),
        )
        .route(
            "/v1/movies/:id",
            get(movies::show_movie_handler::<D>)
                .patch(movies::update_movie_handler::<D>)
                .delete(movies::delete_movie_handler::<D>),
        )
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate_middleware::<D>,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware::<D>,
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            server_error_middleware::<D>,
        ))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Health check endpoint handler
async fn health_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "available".to_string(),
        system_info: SystemInfo {
            environment: state.environment.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

async fn not_found_handler() -> AppError {
    AppError::NotFound
}
