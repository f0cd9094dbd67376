//! HTTP middleware for movies-api
//!
//! This module provides middleware layers for:
//! - Per-client rate limiting
//! - Bearer token authentication
//! - Internal error logging and rendering
//! - Request/response logging
//!
//! and the extractors handlers use to read what the middleware attached.

use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::database::Database;
use crate::error::{AppError, InternalErrorDetail, InvariantError};
use crate::models::{Identity, User};

use super::router::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolve the address a client is rate limited by
///
/// Proxy headers are only consulted when `trust_proxy_headers` is set;
/// otherwise, or when they do not hold an IP, the socket peer is used.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }

        let real_ip = headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = real_ip {
            return ip;
        }
    }

    peer.ip()
}

/// Rate limiting middleware function
///
/// Rejects the request with 429 when the client's bucket is empty.
pub async fn rate_limit_middleware<D: Database + 'static>(
    State(state): State<AppState<D>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limiter.is_enabled() {
        return next.run(request).await;
    }

    let ip = client_ip(request.headers(), addr, state.trust_proxy_headers);

    if !state.rate_limiter.admit(ip) {
        tracing::debug!(client_ip = %ip, "Rate limit exceeded");
        return AppError::RateLimitExceeded.into_response();
    }

    next.run(request).await
}

/// Authentication middleware function
///
/// This middleware:
/// 1. Reads the Authorization header (absent means anonymous)
/// 2. Resolves a bearer token to its user
/// 3. Adds the resulting `Identity` to the request extensions
///
/// Every response it produces varies on `Authorization`.
pub async fn authenticate_middleware<D: Database + 'static>(
    State(state): State<AppState<D>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = match request.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(value) => Some(value.to_string()),
            Err(_) => {
                let response = AppError::InvalidAuthenticationToken.into_response();
                return vary_on_authorization(response);
            }
        },
    };

    let identity = match state.auth_manager.authenticate(authorization.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => return vary_on_authorization(AppError::from(e).into_response()),
    };

    request.extensions_mut().insert(identity);

    vary_on_authorization(next.run(request).await)
}

fn vary_on_authorization(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

/// Internal error middleware function
///
/// Logs every response carrying an `InternalErrorDetail` together with the
/// request method and URI. In development the generic body is replaced with
/// the detail.
pub async fn server_error_middleware<D: Database + 'static>(
    State(state): State<AppState<D>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let Some(detail) = response.extensions().get::<InternalErrorDetail>().cloned() else {
        return response;
    };

    tracing::error!(
        method = %method,
        uri = %uri,
        error = %detail.0,
        "Internal server error"
    );

    if !state.environment.is_development() {
        return response;
    }

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = Json(json!({
        "error": {
            "message": detail.0,
            "method": method.as_str(),
            "uri": uri.to_string(),
        }
    }));

    (parts, body).into_response()
}

/// Response for a handler that panicked
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`. The
/// connection is closed after the response is written.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut response = AppError::Internal(format!("panic: {}", detail)).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Logging middleware function
///
/// Logs request and response details including:
/// - Method and path
/// - Status code
/// - Response time
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}

// =============================================================================
// Extractors
// =============================================================================

/// The caller identity attached by `authenticate_middleware`
///
/// A request that never passed through the middleware has no identity and
/// is rejected with an `InvariantError` (500).
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(InvariantError("identity missing from request context"))?;
        Ok(CurrentIdentity(identity))
    }
}

/// An authenticated caller whose account is activated
#[derive(Debug, Clone)]
pub struct ActivatedUser(pub User);

#[async_trait]
impl<D: Database + 'static> FromRequestParts<AppState<D>> for ActivatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<D>,
    ) -> Result<Self, Self::Rejection> {
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;
        let user = state.auth_manager.require_activated(&identity)?;
        Ok(ActivatedUser(user.clone()))
    }
}

/// JSON request body whose decoding failures become 400 responses
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                let status = rejection.status();
                let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "body must not be larger than 1048576 bytes".to_string()
                } else {
                    rejection.body_text()
                };
                Err(AppError::BadRequest(message))
            }
        }
    }
}
