//! Authentication manager
//!
//! This module provides the main authentication interface for the application.
//! It issues and resolves scoped tokens, resolves the caller identity from an
//! `Authorization` header, and checks email/password logins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::database::Database;
use crate::error::{AuthError, InvariantError};
use crate::models::{Identity, Token, TokenScope, User};

use super::password::spawn_verify_dummy;
use super::token::{hash_token_plaintext, is_valid_token_format};

/// Configuration for the authentication manager
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Lifetime of account activation tokens
    pub activation_ttl: Duration,

    /// Lifetime of bearer authentication tokens
    pub authentication_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            activation_ttl: Duration::from_secs(3 * 24 * 60 * 60),
            authentication_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Authentication manager
///
/// Provides methods for authenticating requests and managing tokens.
pub struct AuthManager<D: Database> {
    db: Arc<D>,
    config: AuthConfig,
}

impl<D: Database> AuthManager<D> {
    /// Create a new authentication manager
    pub fn new(db: Arc<D>, config: AuthConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue a new token and persist its digest
    ///
    /// The returned token is the only place the plaintext ever exists.
    pub async fn issue_token(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<Token, AuthError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| InvariantError("token ttl out of range"))?;
        let token = Token::generate(user_id, ttl, scope);

        self.db.insert_token(&token).await?;

        tracing::debug!(user_id, scope = %scope, expiry = %token.expiry, "Issued token");
        Ok(token)
    }

    /// Issue an activation token with the configured lifetime
    pub async fn issue_activation_token(&self, user_id: i64) -> Result<Token, AuthError> {
        self.issue_token(user_id, self.config.activation_ttl, TokenScope::Activation)
            .await
    }

    /// Issue an authentication token with the configured lifetime
    pub async fn issue_authentication_token(&self, user_id: i64) -> Result<Token, AuthError> {
        self.issue_token(
            user_id,
            self.config.authentication_ttl,
            TokenScope::Authentication,
        )
        .await
    }

    /// Resolve a plaintext token to its owner
    ///
    /// Malformed input is rejected before the store is consulted.
    pub async fn resolve_token(
        &self,
        scope: TokenScope,
        plaintext: &str,
    ) -> Result<User, AuthError> {
        if !is_valid_token_format(plaintext) {
            return Err(AuthError::InvalidToken);
        }

        let hash = hash_token_plaintext(plaintext);

        self.db
            .get_user_for_token(scope, &hash, Utc::now())
            .await?
            .ok_or(AuthError::TokenNotFound)
    }

    /// Revoke every token of `scope` held by `user_id`
    pub async fn revoke_all(&self, scope: TokenScope, user_id: i64) -> Result<u64, AuthError> {
        let deleted = self.db.delete_tokens_for_user(scope, user_id).await?;
        tracing::debug!(user_id, scope = %scope, deleted, "Revoked tokens");
        Ok(deleted)
    }

    /// Resolve the caller identity from an `Authorization` header value
    ///
    /// A missing header is an anonymous caller. Anything else must be exactly
    /// `Bearer <token>` and resolve to a live authentication token.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        let Some(header) = authorization else {
            return Ok(Identity::Anonymous);
        };

        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() != 2 || parts[0] != "Bearer" {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .resolve_token(TokenScope::Authentication, parts[1])
            .await?;

        Ok(Identity::Authenticated(user))
    }

    /// Check an email/password pair and issue an authentication token
    ///
    /// An unknown email and a wrong password are indistinguishable to the
    /// caller. An unknown email still pays for one Argon2id verification
    /// against a stand-in hash.
    pub async fn login(&self, email: &str, password: &str) -> Result<Token, AuthError> {
        let Some(user) = self.db.get_user_by_email(email).await? else {
            spawn_verify_dummy(password.to_string()).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !user.password.matches(password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        self.issue_authentication_token(user.id).await
    }

    /// Gate for routes that need an activated account
    pub fn require_activated<'a>(&self, identity: &'a Identity) -> Result<&'a User, AuthError> {
        let user = identity.user().ok_or(AuthError::AuthenticationRequired)?;

        if !user.activated {
            return Err(AuthError::InactiveAccount);
        }

        Ok(user)
    }
}
