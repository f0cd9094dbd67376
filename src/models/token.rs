//! Token-related domain models
//!
//! A `Token` is a scoped, expiring capability grant. The plaintext is only
//! known at issuance time; the store keeps the digest.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::token::{generate_token_plaintext, hash_token_plaintext};

/// Operation class a token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Single-use account activation
    Activation,
    /// Bearer authentication for API requests
    Authentication,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(TokenScope::Activation),
            "authentication" => Ok(TokenScope::Authentication),
            other => Err(format!("Unknown token scope: {}", other)),
        }
    }
}

/// Issued token
///
/// Serializes as `{"token": <plaintext>, "expiry": <timestamp>}`.
#[derive(Clone, Serialize)]
pub struct Token {
    /// Plaintext handed to the caller exactly once
    #[serde(rename = "token")]
    pub plaintext: String,

    /// SHA-256 digest of the plaintext (hex)
    #[serde(skip)]
    pub hash: String,

    /// Owning user
    #[serde(skip)]
    pub user_id: i64,

    /// When the token stops resolving
    pub expiry: DateTime<Utc>,

    #[serde(skip)]
    pub scope: TokenScope,
}

impl Token {
    /// Generate a fresh token for `user_id` valid for `ttl`
    pub fn generate(user_id: i64, ttl: chrono::Duration, scope: TokenScope) -> Self {
        let plaintext = generate_token_plaintext();
        let hash = hash_token_plaintext(&plaintext);

        Self {
            plaintext,
            hash,
            user_id,
            expiry: Utc::now() + ttl,
            scope,
        }
    }

    /// Whether the token is still valid at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
