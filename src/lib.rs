//! movies-api - A JSON API for a movie catalog
//!
//! This crate provides user registration and activation, bearer token
//! authentication, per-client rate limiting and a movie catalog guarded by
//! optimistic concurrency control.

pub mod auth;
pub mod background;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod server;
pub mod validator;
