//! Credential hashing
//!
//! Passwords are hashed with Argon2id and a random salt. Verification
//! distinguishes a wrong password (`Ok(false)`) from a broken hash or a
//! failing hasher (`Err`). The async helpers run on the blocking pool.

use std::fmt;

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;

use crate::error::{AppError, AuthError, InvariantError, PasswordError};

/// Hash a password with Argon2id
///
/// Returns the PHC-format hash string.
pub fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashFailed(e.to_string()))
}

/// Verify a candidate password against a stored hash
pub fn verify_password(hash: &str, candidate: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::VerifyFailed(e.to_string()))?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyFailed(e.to_string())),
    }
}

/// `hash_password` on the blocking pool
pub async fn spawn_hash(plaintext: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&plaintext))
        .await
        .map_err(|e| PasswordError::Worker(e.to_string()))?
}

/// `verify_password` on the blocking pool
pub async fn spawn_verify(hash: String, candidate: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &candidate))
        .await
        .map_err(|e| PasswordError::Worker(e.to_string()))?
}

// Stand-in credential for logins that name no stored user
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("no account has this password").ok());

/// Verify `candidate` against a stand-in hash on the blocking pool
///
/// Costs one Argon2id verification, like a real login. The outcome carries
/// no meaning and is only reported for tests.
pub async fn spawn_verify_dummy(candidate: String) -> Option<bool> {
    tokio::task::spawn_blocking(move || {
        let hash = DUMMY_HASH.as_deref()?;
        verify_password(hash, &candidate).ok()
    })
    .await
    .ok()
    .flatten()
}

/// A user's credential
///
/// `plaintext` is only populated for the request that supplied it and is
/// never persisted, serialized or logged.
#[derive(Clone, Default, PartialEq)]
pub struct Password {
    plaintext: Option<String>,
    hash: Option<String>,
}

impl Password {
    /// Credential loaded from storage
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            plaintext: None,
            hash: Some(hash.into()),
        }
    }

    /// Hash `plaintext` and keep both forms
    pub async fn set(&mut self, plaintext: &str) -> Result<(), PasswordError> {
        let hash = spawn_hash(plaintext.to_string()).await?;
        self.plaintext = Some(plaintext.to_string());
        self.hash = Some(hash);
        Ok(())
    }

    /// Compare a candidate against the stored hash
    pub async fn matches(&self, candidate: &str) -> Result<bool, MatchError> {
        let hash = self
            .hash
            .clone()
            .ok_or(InvariantError("password hash missing for stored user"))?;
        Ok(spawn_verify(hash, candidate.to_string()).await?)
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[redacted]"))
            .field("hash", &self.hash.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Failure while matching a password
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MatchError {
    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl From<MatchError> for AuthError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Invariant(e) => AuthError::Invariant(e),
            MatchError::Password(e) => AuthError::Password(e),
        }
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        AuthError::from(err).into()
    }
}
