//! User accounts and the per-request caller identity

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::password::Password;
use crate::error::InvariantError;
use crate::validator::{matches, Validator, EMAIL_RX};

/// Registered user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,

    pub created_at: DateTime<Utc>,

    pub name: String,

    pub email: String,

    #[serde(skip)]
    pub password: Password,

    pub activated: bool,

    #[serde(skip)]
    pub version: i32,
}

impl User {
    /// New, not yet persisted, inactive user
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            name: name.into(),
            email: email.into(),
            password: Password::default(),
            activated: false,
            version: 1,
        }
    }
}

/// The caller behind a request
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Anonymous,
    Authenticated(User),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(user) => Some(user),
        }
    }
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        matches(email, &EMAIL_RX),
        "email",
        "must be a valid email address",
    );
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= 8,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}

/// Validate a user about to be stored
///
/// A missing password hash is reported as an `InvariantError`, not as a
/// field message.
pub fn validate_user(v: &mut Validator, user: &User) -> Result<(), InvariantError> {
    v.check(!user.name.is_empty(), "name", "must be provided");
    v.check(
        user.name.len() <= 500,
        "name",
        "must not be more than 500 bytes long",
    );

    validate_email(v, &user.email);

    if let Some(plaintext) = user.password.plaintext() {
        validate_password_plaintext(v, plaintext);
    }

    if user.password.hash().is_none() {
        return Err(InvariantError("missing password hash for user"));
    }

    Ok(())
}
