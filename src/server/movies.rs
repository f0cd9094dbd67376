//! Movie catalog handlers
//!
//! Every route here requires an activated account.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::concurrency::{check_expected_version, commit};
use crate::database::Database;
use crate::error::AppError;
use crate::models::movie::validate_movie;
use crate::models::{Movie, MovieFilters, MovieInput, MoviePatch};
use crate::validator::Validator;

use super::middleware::{ActivatedUser, JsonBody};
use super::router::AppState;

/// Parse a movie id path segment; anything but a positive integer is not found
fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(AppError::NotFound)
}

/// List movies matching the query filters, one page at a time
pub async fn list_movies_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    _user: ActivatedUser,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    let filters = MovieFilters::from_query(&query, &mut v);
    v.finish()?;

    let (movies, metadata) = state.database.list_movies(&filters).await?;

    Ok(Json(json!({ "movies": movies, "metadata": metadata })))
}

pub async fn create_movie_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    _user: ActivatedUser,
    JsonBody(input): JsonBody<MovieInput>,
) -> Result<impl IntoResponse, AppError> {
    let movie = Movie::from_input(input);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.finish()?;

    let movie = state.database.insert_movie(&movie).await?;
    let location = format!("/v1/movies/{}", movie.id);

    tracing::info!(movie_id = movie.id, "Movie created");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "movie": movie })),
    ))
}

pub async fn show_movie_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    _user: ActivatedUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;

    let movie = state
        .database
        .get_movie(id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(json!({ "movie": movie })))
}

/// Apply a partial update under optimistic concurrency control
///
/// A stale `X-Expected-Version` fails before any write. Otherwise the store
/// applies the update only if nobody else wrote the movie since it was read.
pub async fn update_movie_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    _user: ActivatedUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(patch): JsonBody<MoviePatch>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;

    let mut movie = state
        .database
        .get_movie(id)
        .await?
        .ok_or(AppError::NotFound)?;

    check_expected_version(&headers, &movie)?;

    patch.apply(&mut movie);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.finish()?;

    let outcome = state.database.update_movie(&movie).await;
    commit(&mut movie, outcome)?;

    tracing::debug!(movie_id = movie.id, version = movie.version, "Movie updated");

    Ok(Json(json!({ "movie": movie })))
}

pub async fn delete_movie_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    _user: ActivatedUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;

    state.database.delete_movie(id).await?;

    tracing::info!(movie_id = id, "Movie deleted");

    Ok(Json(json!({ "message": "movie successfully deleted" })))
}
