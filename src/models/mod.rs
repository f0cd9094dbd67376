//! Domain models for movies-api
//!
//! This module contains the core domain models used throughout the application.

pub mod movie;
pub mod token;
pub mod user;

// Re-export commonly used types
pub use movie::{Metadata, Movie, MovieFilters, MovieInput, MoviePatch, Runtime};
pub use token::{Token, TokenScope};
pub use user::{Identity, User};
