//! Database layer for movies-api
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{Metadata, Movie, MovieFilters, Token, TokenScope, User};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the application.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
/// Implementations bound every call by a deadline and report an expired
/// deadline as `DbError::Timeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // User operations
    // =========================================================================

    /// Insert a new user
    ///
    /// Returns the user with `id`, `created_at` and `version` as stored.
    /// A taken email address yields `DbError::DuplicateEmail`.
    async fn insert_user(&self, user: &User) -> Result<User, DbError>;

    /// Look up a user by email address
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;

    /// Conditionally update a user
    ///
    /// Succeeds only while the stored version equals `user.version`; returns
    /// the new version. Zero rows matched yields `DbError::EditConflict`.
    async fn update_user(&self, user: &User) -> Result<i32, DbError>;

    // =========================================================================
    // Token operations
    // =========================================================================

    /// Find the owner of a live token
    ///
    /// Matches on digest and scope, and only while `expiry > now`.
    async fn get_user_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError>;

    /// Persist a token digest
    async fn insert_token(&self, token: &Token) -> Result<(), DbError>;

    /// Delete every token of `scope` owned by `user_id`
    ///
    /// Returns the number of deleted tokens
    async fn delete_tokens_for_user(&self, scope: TokenScope, user_id: i64)
        -> Result<u64, DbError>;

    // =========================================================================
    // Movie operations
    // =========================================================================

    /// Insert a movie, returning it with `id`, `created_at` and `version`
    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DbError>;

    /// Get a movie by ID
    async fn get_movie(&self, id: i64) -> Result<Option<Movie>, DbError>;

    /// Conditionally update a movie
    ///
    /// Same contract as `update_user`.
    async fn update_movie(&self, movie: &Movie) -> Result<i32, DbError>;

    /// Delete a movie; a missing ID yields `DbError::NotFound`
    async fn delete_movie(&self, id: i64) -> Result<(), DbError>;

    /// List movies matching the filters, with paging metadata
    async fn list_movies(&self, filters: &MovieFilters)
        -> Result<(Vec<Movie>, Metadata), DbError>;
}
