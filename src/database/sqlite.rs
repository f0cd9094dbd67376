//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations. Every call is
//! bounded by the configured query timeout: a call still queued at the
//! deadline never runs, and a running statement is interrupted.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{ErrorCode, InterruptHandle, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::auth::password::Password;
use crate::error::DbError;
use crate::models::{Metadata, Movie, MovieFilters, Runtime, Token, TokenScope, User};

/// Default deadline for a single store call
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const USER_COLUMNS: &str = "id, created_at, name, email, password_hash, activated, version";

const MOVIE_COLUMNS: &str = "id, created_at, title, year, runtime, genres, version";

// Lifecycle of a single store call
const CALL_PENDING: u8 = 0;
const CALL_RUNNING: u8 = 1;
const CALL_CANCELLED: u8 = 2;

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
    interrupt: InterruptHandle,
    query_timeout: Duration,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        Self::with_timeout(path, DEFAULT_QUERY_TIMEOUT).await
    }

    /// Like `new`, with an explicit per-call deadline
    pub async fn with_timeout(path: &str, query_timeout: Duration) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        let interrupt = conn.call(|conn| Ok(conn.get_interrupt_handle())).await?;

        Ok(Self {
            conn,
            interrupt,
            query_timeout,
        })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Run `f` on the connection thread, aborting it after `query_timeout`
    ///
    /// If `f` has not started by the deadline it is cancelled and never
    /// touches the connection. If it is already running, its statement is
    /// interrupted and the call waits for `f` to return, so a reported
    /// `Timeout` always means nothing was written.
    async fn call<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(CALL_PENDING));
        let worker_state = Arc::clone(&state);

        let call = self.conn.call(move |conn| {
            if worker_state
                .compare_exchange(CALL_PENDING, CALL_RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(interrupted_error().into());
            }
            f(conn)
        });
        tokio::pin!(call);

        let result = match tokio::time::timeout(self.query_timeout, &mut call).await {
            Ok(result) => result,
            Err(_) => {
                let cancelled = state
                    .compare_exchange(
                        CALL_PENDING,
                        CALL_CANCELLED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if cancelled {
                    tracing::warn!(
                        timeout = ?self.query_timeout,
                        "Store call cancelled before start"
                    );
                    return Err(DbError::Timeout(self.query_timeout));
                }

                tracing::warn!(timeout = ?self.query_timeout, "Interrupting store call");
                self.interrupt.interrupt();
                call.await
            }
        };

        match result {
            Err(e) if is_interrupted(&e) => Err(DbError::Timeout(self.query_timeout)),
            other => other.map_err(classify),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // User operations
    // =========================================================================

    async fn insert_user(&self, user: &User) -> Result<User, DbError> {
        let mut stored = user.clone();
        let created_at = format_datetime(user.created_at);
        let name = user.name.clone();
        let email = user.email.clone();
        let password_hash = user
            .password
            .hash()
            .map(str::to_string)
            .ok_or_else(|| DbError::Corrupt("user has no password hash".to_string()))?;
        let activated = user.activated;

        let result = self
            .call(move |conn| {
                let row = conn.query_row(
                    r#"
                    INSERT INTO users (created_at, name, email, password_hash, activated)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    RETURNING id, version
                    "#,
                    rusqlite::params![created_at, name, email, password_hash, activated],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)),
                )?;
                Ok(row)
            })
            .await;

        match result {
            Ok((id, version)) => {
                stored.id = id;
                stored.version = version;
                Ok(stored)
            }
            Err(DbError::Sqlite(e)) if is_unique_violation(&e) => Err(DbError::DuplicateEmail),
            Err(e) => Err(e),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let email = email.to_string();

        self.call(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                    [&email],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn update_user(&self, user: &User) -> Result<i32, DbError> {
        let id = user.id;
        let version = user.version;
        let name = user.name.clone();
        let email = user.email.clone();
        let password_hash = user.password.hash().map(str::to_string);
        let activated = user.activated;

        let result = self
            .call(move |conn| {
                let new_version = conn
                    .query_row(
                        r#"
                        UPDATE users
                        SET name = ?1, email = ?2,
                            password_hash = COALESCE(?3, password_hash),
                            activated = ?4, version = version + 1
                        WHERE id = ?5 AND version = ?6
                        RETURNING version
                        "#,
                        rusqlite::params![name, email, password_hash, activated, id, version],
                        |row| row.get::<_, i32>(0),
                    )
                    .optional()?;
                Ok(new_version)
            })
            .await;

        match result {
            Ok(Some(new_version)) => Ok(new_version),
            Ok(None) => Err(DbError::EditConflict),
            Err(DbError::Sqlite(e)) if is_unique_violation(&e) => Err(DbError::DuplicateEmail),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Token operations
    // =========================================================================

    async fn get_user_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError> {
        let token_hash = token_hash.to_string();
        let now = format_datetime(now);

        self.call(move |conn| {
            let user = conn
                .query_row(
                    r#"
                    SELECT users.id, users.created_at, users.name, users.email,
                           users.password_hash, users.activated, users.version
                    FROM users
                    INNER JOIN tokens ON users.id = tokens.user_id
                    WHERE tokens.hash = ?1 AND tokens.scope = ?2 AND tokens.expiry > ?3
                    "#,
                    rusqlite::params![token_hash, scope.as_str(), now],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn insert_token(&self, token: &Token) -> Result<(), DbError> {
        let hash = token.hash.clone();
        let user_id = token.user_id;
        let expiry = format_datetime(token.expiry);
        let scope = token.scope.as_str();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tokens (hash, user_id, expiry, scope) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![hash, user_id, expiry, scope],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_tokens_for_user(
        &self,
        scope: TokenScope,
        user_id: i64,
    ) -> Result<u64, DbError> {
        self.call(move |conn| {
            let count = conn.execute(
                "DELETE FROM tokens WHERE scope = ?1 AND user_id = ?2",
                rusqlite::params![scope.as_str(), user_id],
            )?;
            Ok(count as u64)
        })
        .await
    }

    // =========================================================================
    // Movie operations
    // =========================================================================

    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DbError> {
        let mut stored = movie.clone();
        let created_at = format_datetime(movie.created_at);
        let title = movie.title.clone();
        let year = movie.year;
        let runtime = movie.runtime.0;
        let genres = encode_genres(&movie.genres)?;

        let (id, version) = self
            .call(move |conn| {
                let row = conn.query_row(
                    r#"
                    INSERT INTO movies (created_at, title, year, runtime, genres)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    RETURNING id, version
                    "#,
                    rusqlite::params![created_at, title, year, runtime, genres],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)),
                )?;
                Ok(row)
            })
            .await?;

        stored.id = id;
        stored.version = version;
        Ok(stored)
    }

    async fn get_movie(&self, id: i64) -> Result<Option<Movie>, DbError> {
        if id < 1 {
            return Ok(None);
        }

        self.call(move |conn| {
            let movie = conn
                .query_row(
                    &format!("SELECT {} FROM movies WHERE id = ?1", MOVIE_COLUMNS),
                    [id],
                    movie_from_row,
                )
                .optional()?;
            Ok(movie)
        })
        .await
    }

    async fn update_movie(&self, movie: &Movie) -> Result<i32, DbError> {
        let id = movie.id;
        let version = movie.version;
        let title = movie.title.clone();
        let year = movie.year;
        let runtime = movie.runtime.0;
        let genres = encode_genres(&movie.genres)?;

        self.call(move |conn| {
            let new_version = conn
                .query_row(
                    r#"
                    UPDATE movies
                    SET title = ?1, year = ?2, runtime = ?3, genres = ?4, version = version + 1
                    WHERE id = ?5 AND version = ?6
                    RETURNING version
                    "#,
                    rusqlite::params![title, year, runtime, genres, id, version],
                    |row| row.get::<_, i32>(0),
                )
                .optional()?;
            Ok(new_version)
        })
        .await?
        .ok_or(DbError::EditConflict)
    }

    async fn delete_movie(&self, id: i64) -> Result<(), DbError> {
        if id < 1 {
            return Err(DbError::NotFound);
        }

        let count = self
            .call(move |conn| {
                let count = conn.execute("DELETE FROM movies WHERE id = ?1", [id])?;
                Ok(count)
            })
            .await?;

        if count == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn list_movies(
        &self,
        filters: &MovieFilters,
    ) -> Result<(Vec<Movie>, Metadata), DbError> {
        let title = escape_like(&filters.title);
        let genres = encode_genres(&filters.genres)?;
        let limit = filters.limit();
        let offset = filters.offset();
        let page = filters.page;
        let page_size = filters.page_size;

        // sort_column/sort_direction only ever return safelisted identifiers
        let query = format!(
            r#"
            SELECT count(*) OVER(), {}
            FROM movies
            WHERE (?1 = '' OR title LIKE '%' || ?1 || '%' ESCAPE '\')
              AND NOT EXISTS (
                  SELECT 1 FROM json_each(?2) AS wanted
                  WHERE wanted.value NOT IN (SELECT value FROM json_each(movies.genres))
              )
            ORDER BY {} {}, id ASC
            LIMIT ?3 OFFSET ?4
            "#,
            MOVIE_COLUMNS,
            filters.sort_column(),
            filters.sort_direction()
        );

        let (total, movies) = self
            .call(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let mut total: i64 = 0;

                let movies = stmt
                    .query_map(rusqlite::params![title, genres, limit, offset], |row| {
                        total = row.get(0)?;
                        movie_from_row_at(row, 1)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok((total, movies))
            })
            .await?;

        Ok((movies, Metadata::calculate(total, page, page_size)))
    }
}

/// Map connection-level failures onto `DbError`
fn classify(err: tokio_rusqlite::Error) -> DbError {
    match err {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::FromSqlConversionFailure(idx, _, e)) => {
            DbError::Corrupt(format!("column {}: {}", idx, e))
        }
        tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
        other => DbError::Connection(other),
    }
}

fn interrupted_error() -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
        None,
    )
}

fn is_interrupted(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::OperationInterrupted
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        created_at: datetime_column(row, 1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        password: Password::from_hash(row.get::<_, String>(4)?),
        activated: row.get(5)?,
        version: row.get(6)?,
    })
}

fn movie_from_row(row: &Row<'_>) -> rusqlite::Result<Movie> {
    movie_from_row_at(row, 0)
}

/// Decode `MOVIE_COLUMNS` starting at column `base`
fn movie_from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Movie> {
    let genres: String = row.get(base + 5)?;
    let genres = serde_json::from_str(&genres).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            base + 5,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    Ok(Movie {
        id: row.get(base)?,
        created_at: datetime_column(row, base + 1)?,
        title: row.get(base + 2)?,
        year: row.get(base + 3)?,
        runtime: Runtime(row.get(base + 4)?),
        genres,
        version: row.get(base + 6)?,
    })
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Fixed-width UTC text, so lexical order is time order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_genres(genres: &[String]) -> Result<String, DbError> {
    serde_json::to_string(genres).map_err(|e| DbError::Corrupt(e.to_string()))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
