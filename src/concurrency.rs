//! Optimistic concurrency for versioned records
//!
//! Every mutable record carries a version that starts at 1 and grows by one
//! on each successful write. Writers never hold a lock across
//! read-modify-write: the store applies a write only while the stored
//! version still equals the version read earlier, and a miss surfaces as
//! `EditConflict`. The optional `X-Expected-Version` request header lets a
//! client fail fast before any write is attempted.

use axum::http::HeaderMap;

use crate::error::{AppError, DbError};
use crate::models::{Movie, User};

/// Request header carrying the version the client last saw
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

/// A record guarded by a version counter
pub trait Versioned {
    fn version(&self) -> i32;

    fn set_version(&mut self, version: i32);
}

impl Versioned for Movie {
    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

impl Versioned for User {
    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Compare the declared expected version with the record as read
///
/// Absent header passes. A value that is not the current version, including
/// one that is not a number, is a conflict.
pub fn check_expected_version<R: Versioned>(
    headers: &HeaderMap,
    record: &R,
) -> Result<(), AppError> {
    let Some(declared) = headers.get(EXPECTED_VERSION_HEADER) else {
        return Ok(());
    };

    let matches = declared
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .is_some_and(|v| v == record.version());

    if matches {
        Ok(())
    } else {
        tracing::debug!(
            declared = ?declared,
            current = record.version(),
            "Expected version mismatch"
        );
        Err(AppError::EditConflict)
    }
}

/// Record the outcome of a conditional write
///
/// `outcome` is the result of a store write that applied the change only if
/// the stored version still equalled `record.version()`. On success the new
/// version is stored on the record. On a miss the record is left untouched
/// and the caller gets `EditConflict`.
pub fn commit<R: Versioned>(
    record: &mut R,
    outcome: Result<i32, DbError>,
) -> Result<(), AppError> {
    match outcome {
        Ok(new_version) => {
            record.set_version(new_version);
            Ok(())
        }
        Err(DbError::EditConflict) => Err(AppError::EditConflict),
        Err(e) => Err(e.into()),
    }
}
