//! Bearer token generation and digesting
//!
//! Plaintext tokens are 32 bytes from the OS random source encoded in
//! URL-safe Base64 without padding, so every token has the same length.
//! Only the unsalted SHA-256 digest of a token is ever stored, and the store
//! looks tokens up by that digest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::validator::Validator;

/// Length of the random part of the token in bytes
const TOKEN_RANDOM_BYTES: usize = 32;

/// Length of an encoded plaintext token
pub const TOKEN_LENGTH: usize = 43;

/// Generate a new plaintext token
///
/// # Example
///
/// ```
/// use movies_api::auth::token::{generate_token_plaintext, TOKEN_LENGTH};
///
/// let token = generate_token_plaintext();
/// assert_eq!(token.len(), TOKEN_LENGTH);
/// ```
pub fn generate_token_plaintext() -> String {
    let mut random_bytes = [0u8; TOKEN_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// SHA-256 digest of a plaintext token, hex encoded
///
/// # Example
///
/// ```
/// use movies_api::auth::token::hash_token_plaintext;
///
/// assert_eq!(hash_token_plaintext("abc"), hash_token_plaintext("abc"));
/// assert_eq!(hash_token_plaintext("abc").len(), 64);
/// ```
pub fn hash_token_plaintext(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Cheap local check run before any store lookup
///
/// Rejects empty input, anything not exactly `TOKEN_LENGTH` long, and
/// anything that is not URL-safe Base64.
pub fn is_valid_token_format(plaintext: &str) -> bool {
    if plaintext.is_empty() || plaintext.len() != TOKEN_LENGTH {
        return false;
    }

    URL_SAFE_NO_PAD.decode(plaintext).is_ok()
}

/// Record field errors for a user-supplied token
pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == TOKEN_LENGTH,
        "token",
        &format!("must be {} bytes long", TOKEN_LENGTH),
    );
}
