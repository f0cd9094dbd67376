//! Integration tests for the movie catalog and optimistic concurrency

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{create_test_config, create_test_database, TestApp};
use movies_api::database::{Database, SqliteDatabase};
use movies_api::error::DbError;
use movies_api::models::{Metadata, Movie, MovieFilters, Token, TokenScope, User};
use serde_json::json;

/// SQLite store whose movie reads return only after a pause, so that
/// concurrent requests observe the same version before either writes
struct SlowReads {
    inner: Arc<SqliteDatabase>,
    pause: Duration,
}

#[async_trait]
impl Database for SlowReads {
    async fn insert_user(&self, user: &User) -> Result<User, DbError> {
        self.inner.insert_user(user).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        self.inner.get_user_by_email(email).await
    }

    async fn update_user(&self, user: &User) -> Result<i32, DbError> {
        self.inner.update_user(user).await
    }

    async fn get_user_for_token(
        &self,
        scope: TokenScope,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError> {
        self.inner.get_user_for_token(scope, token_hash, now).await
    }

    async fn insert_token(&self, token: &Token) -> Result<(), DbError> {
        self.inner.insert_token(token).await
    }

    async fn delete_tokens_for_user(
        &self,
        scope: TokenScope,
        user_id: i64,
    ) -> Result<u64, DbError> {
        self.inner.delete_tokens_for_user(scope, user_id).await
    }

    async fn insert_movie(&self, movie: &Movie) -> Result<Movie, DbError> {
        self.inner.insert_movie(movie).await
    }

    async fn get_movie(&self, id: i64) -> Result<Option<Movie>, DbError> {
        let movie = self.inner.get_movie(id).await?;
        tokio::time::sleep(self.pause).await;
        Ok(movie)
    }

    async fn update_movie(&self, movie: &Movie) -> Result<i32, DbError> {
        self.inner.update_movie(movie).await
    }

    async fn delete_movie(&self, id: i64) -> Result<(), DbError> {
        self.inner.delete_movie(id).await
    }

    async fn list_movies(
        &self,
        filters: &MovieFilters,
    ) -> Result<(Vec<Movie>, Metadata), DbError> {
        self.inner.list_movies(filters).await
    }
}

fn casablanca() -> serde_json::Value {
    json!({
        "title": "Casablanca",
        "year": 1942,
        "runtime": "102 mins",
        "genres": ["drama", "romance", "war"]
    })
}

/// Test 1: Create, read, update and delete a movie
#[tokio::test]
async fn test_movie_crud() {
    let app = TestApp::spawn(create_test_config()).await;
    let bearer = app.activated_user_token("alice@example.com").await;

    let response = app
        .client
        .post(app.url("/v1/movies"))
        .bearer_auth(&bearer)
        .json(&casablanca())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: serde_json::Value = response.json().await.unwrap();
    let id = body["movie"]["id"].as_i64().unwrap();
    assert_eq!(location, format!("/v1/movies/{}", id));
    assert_eq!(body["movie"]["version"], 1);
    assert!(body["movie"].get("created_at").is_none());

    let response = app
        .client
        .get(app.url(&location))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["movie"]["runtime"], "102 mins");
    assert_eq!(body["movie"]["genres"], json!(["drama", "romance", "war"]));

    let response = app
        .client
        .patch(app.url(&location))
        .bearer_auth(&bearer)
        .json(&json!({ "runtime": "103 mins" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["movie"]["runtime"], "103 mins");
    assert_eq!(body["movie"]["title"], "Casablanca");
    assert_eq!(body["movie"]["version"], 2);

    let response = app
        .client
        .delete(app.url(&location))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    for _ in 0..2 {
        let response = app
            .client
            .get(app.url(&location))
            .bearer_auth(&bearer)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    let response = app
        .client
        .delete(app.url(&location))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

/// Test 2: Listing filters, sorting and paging
#[tokio::test]
async fn test_list_movies_filters() {
    let app = TestApp::spawn(create_test_config()).await;
    let bearer = app.activated_user_token("alice@example.com").await;

    app.create_movie(&bearer, casablanca()).await;
    app.create_movie(
        &bearer,
        json!({
            "title": "The Breakfast Club",
            "year": 1985,
            "runtime": "96 mins",
            "genres": ["comedy", "drama"]
        }),
    )
    .await;
    app.create_movie(
        &bearer,
        json!({
            "title": "Black Panther",
            "year": 2018,
            "runtime": "134 mins",
            "genres": ["action", "adventure"]
        }),
    )
    .await;

    let list = |query: &'static str| {
        let request = app
            .client
            .get(app.url(&format!("/v1/movies{}", query)))
            .bearer_auth(&bearer);
        async move {
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), 200, "query {:?}", query);
            response.json::<serde_json::Value>().await.unwrap()
        }
    };

    let body = list("").await;
    assert_eq!(body["movies"].as_array().unwrap().len(), 3);
    assert_eq!(body["metadata"]["total_records"], 3);
    assert_eq!(body["metadata"]["last_page"], 1);

    let body = list("?genres=drama").await;
    assert_eq!(body["movies"].as_array().unwrap().len(), 2);

    let body = list("?genres=drama,comedy").await;
    assert_eq!(body["movies"].as_array().unwrap().len(), 1);
    assert_eq!(body["movies"][0]["title"], "The Breakfast Club");

    let body = list("?title=black").await;
    assert_eq!(body["movies"][0]["title"], "Black Panther");

    let body = list("?sort=-year").await;
    assert_eq!(body["movies"][0]["year"], 2018);
    assert_eq!(body["movies"][2]["year"], 1942);

    let body = list("?page=2&page_size=2&sort=title").await;
    assert_eq!(body["movies"].as_array().unwrap().len(), 1);
    assert_eq!(body["movies"][0]["title"], "The Breakfast Club");
    assert_eq!(body["metadata"]["current_page"], 2);
    assert_eq!(body["metadata"]["last_page"], 2);

    // No matches: empty list and empty metadata
    let body = list("?title=zzz").await;
    assert_eq!(body["movies"], json!([]));
    assert_eq!(body["metadata"], json!({}));
}

/// Test 3: Concurrent updates from the same version produce exactly one winner
#[tokio::test]
async fn test_concurrent_patch_single_winner() {
    let app = TestApp::spawn(create_test_config()).await;
    let bearer = app.activated_user_token("alice@example.com").await;
    let movie = app.create_movie(&bearer, casablanca()).await;
    let url = app.url(&format!("/v1/movies/{}", movie["id"]));

    let patch = |year: i32| {
        app.client
            .patch(&url)
            .bearer_auth(&bearer)
            .header("X-Expected-Version", "1")
            .json(&json!({ "year": year }))
            .send()
    };

    let (first, second) = tokio::join!(patch(1943), patch(1944));
    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);

    let response = app
        .client
        .get(&url)
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["movie"]["version"], 2);
    let year = body["movie"]["year"].as_i64().unwrap();
    assert!(year == 1943 || year == 1944);
}

/// Test 4: A stale expected version is rejected and the record is unchanged
#[tokio::test]
async fn test_stale_expected_version() {
    let app = TestApp::spawn(create_test_config()).await;
    let bearer = app.activated_user_token("alice@example.com").await;
    let movie = app.create_movie(&bearer, casablanca()).await;
    let url = app.url(&format!("/v1/movies/{}", movie["id"]));

    // Bring the movie to version 4
    for year in [1943, 1944, 1945] {
        let response = app
            .client
            .patch(&url)
            .bearer_auth(&bearer)
            .json(&json!({ "year": year }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = app
        .client
        .patch(&url)
        .bearer_auth(&bearer)
        .header("X-Expected-Version", "3")
        .json(&json!({ "title": "Overwritten" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let response = app
        .client
        .get(&url)
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["movie"]["title"], "Casablanca");
    assert_eq!(body["movie"]["year"], 1945);
    assert_eq!(body["movie"]["version"], 4);

    let response = app
        .client
        .patch(&url)
        .bearer_auth(&bearer)
        .header("X-Expected-Version", "4")
        .json(&json!({ "title": "Casablanca (1942)" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

/// Test 5: Bad movie payloads
#[tokio::test]
async fn test_movie_bad_payloads() {
    let app = TestApp::spawn(create_test_config()).await;
    let bearer = app.activated_user_token("alice@example.com").await;

    let post = |body: serde_json::Value| {
        app.client
            .post(app.url("/v1/movies"))
            .bearer_auth(&bearer)
            .json(&body)
            .send()
    };

    let response = post(json!({
        "title": "Casablanca",
        "year": 1942,
        "runtime": "102 minutes",
        "genres": ["drama"]
    }))
    .await
    .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid format for 'runtime' property"));

    let response = post(json!({ "title": "Casablanca", "rating": 5 })).await.unwrap();
    assert_eq!(response.status(), 400);

    let response = post(json!({
        "title": "Casablanca",
        "year": 1942,
        "runtime": "-5 mins",
        "genres": ["a", "b", "c", "d", "e", "f"]
    }))
    .await
    .unwrap();
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["runtime"], "must be a positive integer");
    assert_eq!(body["error"]["genres"], "must not contain more than 5 genres");
}

/// Test 6: Two requests that read the same version race through the
/// conditional write without an expected-version header
#[tokio::test]
async fn test_concurrent_patch_without_header() {
    let database = Arc::new(SlowReads {
        inner: create_test_database().await,
        pause: Duration::from_millis(300),
    });
    let app = TestApp::spawn_with_database(create_test_config(), database).await;
    let bearer = app.activated_user_token("alice@example.com").await;
    let movie = app.create_movie(&bearer, casablanca()).await;
    let url = app.url(&format!("/v1/movies/{}", movie["id"]));

    let patch = |year: i32| {
        app.client
            .patch(&url)
            .bearer_auth(&bearer)
            .json(&json!({ "year": year }))
            .send()
    };

    let (first, second) = tokio::join!(patch(1943), patch(1944));
    let first = first.unwrap();
    let second = second.unwrap();
    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);

    let loser = if first.status() == 409 { first } else { second };
    let body: serde_json::Value = loser.json().await.unwrap();
    assert_eq!(
        body["error"],
        "unable to update the record due to an edit conflict, please try again"
    );

    let response = app
        .client
        .get(&url)
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["movie"]["version"], 2);
    let year = body["movie"]["year"].as_i64().unwrap();
    assert!(year == 1943 || year == 1944);
}
