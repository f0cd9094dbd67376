//! Authentication system for movies-api
//!
//! This module provides authentication and authorization functionality:
//! - Password hashing and verification
//! - Scoped token generation and resolution
//! - Per-client request rate limiting

pub mod manager;
pub mod password;
pub mod ratelimit;
pub mod token;

pub use manager::{AuthConfig, AuthManager};
pub use password::{hash_password, verify_password, Password};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use token::{
    generate_token_plaintext, hash_token_plaintext, is_valid_token_format, TOKEN_LENGTH,
};
