//! User account and authentication token handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::token::validate_token_plaintext;
use crate::concurrency::commit;
use crate::database::Database;
use crate::error::{AppError, AuthError, DbError};
use crate::models::user::{validate_email, validate_password_plaintext, validate_user};
use crate::models::{TokenScope, User};
use crate::validator::Validator;

use super::middleware::{ActivatedUser, JsonBody};
use super::router::AppState;

/// Registration payload
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Activation payload
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivateUserRequest {
    pub token: String,
}

/// Login payload
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateAuthenticationTokenRequest {
    pub email: String,
    pub password: String,
}

fn field_error(field: &str, message: &str) -> AppError {
    AppError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
}

/// Register a new, inactive user and send them an activation token
pub async fn register_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    JsonBody(input): JsonBody<RegisterUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut user = User::new(input.name, input.email);
    user.password.set(&input.password).await?;

    let mut v = Validator::new();
    validate_user(&mut v, &user)?;
    v.finish()?;

    let user = match state.database.insert_user(&user).await {
        Ok(user) => user,
        Err(DbError::DuplicateEmail) => {
            return Err(field_error(
                "email",
                "a user with this email address already exists",
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let token = state.auth_manager.issue_activation_token(user.id).await?;

    let notifier = Arc::clone(&state.notifier);
    let recipient = user.clone();
    state.background.spawn("send_activation", async move {
        notifier.send_activation(&recipient, &token).await
    });

    tracing::info!(user_id = user.id, "User registered");

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// Activate the account an activation token belongs to
pub async fn activate_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    JsonBody(input): JsonBody<ActivateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    v.finish()?;

    let mut user = match state
        .auth_manager
        .resolve_token(TokenScope::Activation, &input.token)
        .await
    {
        Ok(user) => user,
        Err(AuthError::InvalidToken | AuthError::TokenNotFound) => {
            return Err(field_error("token", "invalid or expired activation token"))
        }
        Err(e) => return Err(e.into()),
    };

    user.activated = true;
    let outcome = state.database.update_user(&user).await;
    commit(&mut user, outcome)?;

    state
        .auth_manager
        .revoke_all(TokenScope::Activation, user.id)
        .await?;

    tracing::info!(user_id = user.id, "User activated");

    Ok(Json(json!({ "user": user })))
}

/// Exchange an email/password pair for an authentication token
pub async fn create_authentication_token_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    JsonBody(input): JsonBody<CreateAuthenticationTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    v.finish()?;

    let token = state
        .auth_manager
        .login(&input.email, &input.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}

/// Revoke every authentication token held by the caller
pub async fn revoke_authentication_tokens_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    ActivatedUser(user): ActivatedUser,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_manager
        .revoke_all(TokenScope::Authentication, user.id)
        .await?;

    Ok(Json(json!({ "message": "authentication tokens revoked" })))
}
