//! Application error types for movies-api
//!
//! Each layer has its own `thiserror` enum. `AppError` aggregates them and
//! is the only type that knows how an error is rendered over HTTP.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Generic message returned for every internal failure outside development
pub const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Authentication-related errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is malformed (empty or wrong length)
    #[error("Invalid token")]
    InvalidToken,

    /// Token digest unknown, expired or bound to another scope
    #[error("Token not found")]
    TokenNotFound,

    /// Email/password pair did not match
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Anonymous caller reached a gated resource
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Caller is known but has not activated the account
    #[error("Inactive account")]
    InactiveAccount,

    /// Store failure while resolving identity
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    /// Hashing subsystem failure
    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    /// Broken precondition on a stored credential
    #[error("{0}")]
    Invariant(#[from] InvariantError),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Background connection error
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Email already registered
    #[error("Duplicate email")]
    DuplicateEmail,

    /// Conditional write matched no row
    #[error("Edit conflict")]
    EditConflict,

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Call exceeded its deadline
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

/// Credential hashing errors
///
/// A wrong password is not an error: verification returns `Ok(false)`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PasswordError {
    /// Hashing failed
    #[error("Hash failed: {0}")]
    HashFailed(String),

    /// Stored hash could not be parsed or verification broke
    #[error("Verification failed: {0}")]
    VerifyFailed(String),

    /// Blocking worker was cancelled or panicked
    #[error("Hashing worker failed: {0}")]
    Worker(String),
}

/// A precondition that must hold by construction was violated
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invariant violated: {0}")]
pub struct InvariantError(pub &'static str);

/// Detailed text of an internal failure, attached to the response
/// so the server error middleware can log it with request context.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

/// Application-level error type
///
/// Handlers return `Result<_, AppError>`; the `IntoResponse` impl maps each
/// variant onto the `{"error": ...}` envelope and a status code.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource does not exist
    #[error("Not found")]
    NotFound,

    /// Version mismatch on write
    #[error("Edit conflict")]
    EditConflict,

    /// Field-level validation failures
    #[error("Failed validation: {0:?}")]
    FailedValidation(BTreeMap<String, String>),

    /// Admission denied by the rate limiter
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Bearer token malformed, unknown or expired
    #[error("Invalid authentication token")]
    InvalidAuthenticationToken,

    /// Anonymous caller on a gated route
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Account not activated
    #[error("Inactive account")]
    InactiveAccount,

    /// Login with wrong email or password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Store failure
    #[error("Database error: {0}")]
    Database(DbError),

    /// Hashing failure
    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    /// Broken precondition
    #[error("{0}")]
    Invariant(#[from] InvariantError),

    /// Any other internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => AppError::NotFound,
            DbError::EditConflict => AppError::EditConflict,
            other => AppError::Database(other),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken | AuthError::TokenNotFound => {
                AppError::InvalidAuthenticationToken
            }
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::AuthenticationRequired => AppError::AuthenticationRequired,
            AuthError::InactiveAccount => AppError::InactiveAccount,
            AuthError::Store(e) => AppError::from(e),
            AuthError::Password(e) => AppError::Password(e),
            AuthError::Invariant(e) => AppError::Invariant(e),
        }
    }
}

impl AppError {
    /// Status code for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidAuthenticationToken
            | AppError::AuthenticationRequired
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::InactiveAccount => StatusCode::FORBIDDEN,
            AppError::Database(_)
            | AppError::Password(_)
            | AppError::Invariant(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure is internal and must not leak detail
    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    fn public_message(&self) -> serde_json::Value {
        match self {
            AppError::BadRequest(msg) => json!(msg),
            AppError::NotFound => json!("the requested resource could not be found"),
            AppError::EditConflict => {
                json!("unable to update the record due to an edit conflict, please try again")
            }
            AppError::FailedValidation(errors) => json!(errors),
            AppError::RateLimitExceeded => json!("rate limit exceeded"),
            AppError::InvalidAuthenticationToken => {
                json!("invalid or missing authentication token")
            }
            AppError::AuthenticationRequired => {
                json!("you must be authenticated to access this resource")
            }
            AppError::InactiveAccount => {
                json!("your user account must be activated to access this resource")
            }
            AppError::InvalidCredentials => json!("invalid authentication credentials"),
            _ => json!(SERVER_ERROR_MESSAGE),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.public_message() }));
        let mut response = (status, body).into_response();

        if matches!(self, AppError::InvalidAuthenticationToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        if self.is_internal() {
            response
                .extensions_mut()
                .insert(InternalErrorDetail(self.to_string()));
        }

        response
    }
}
