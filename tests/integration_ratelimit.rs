//! Integration tests for per-client rate limiting

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{create_test_config, TestApp};
use movies_api::config::Config;
use tokio::sync::broadcast;

fn limited_config(burst: u32) -> Config {
    let mut config = create_test_config();
    config.limiter.enabled = true;
    config.limiter.rps = 0.001;
    config.limiter.burst = burst;
    config
}

/// Test 1: A client that spends its burst is rejected with 429
#[tokio::test]
async fn test_burst_exhaustion() {
    let app = TestApp::spawn(limited_config(2)).await;

    for _ in 0..2 {
        let response = app.client.get(app.url("/v1/healthcheck")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = app.client.get(app.url("/v1/healthcheck")).send().await.unwrap();
    assert_eq!(response.status(), 429);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "rate limit exceeded");

    // Every route is limited, not just the one that spent the tokens
    let response = app.client.get(app.url("/v1/movies")).send().await.unwrap();
    assert_eq!(response.status(), 429);
}

/// Test 2: Forwarded client addresses get their own buckets when trusted
#[tokio::test]
async fn test_forwarded_for_buckets() {
    let mut config = limited_config(1);
    config.limiter.trust_proxy_headers = true;
    let app = TestApp::spawn(config).await;

    let get = |forwarded: &'static str| {
        app.client
            .get(app.url("/v1/healthcheck"))
            .header("X-Forwarded-For", forwarded)
            .send()
    };

    assert_eq!(get("203.0.113.7").await.unwrap().status(), 200);
    assert_eq!(get("203.0.113.7").await.unwrap().status(), 429);
    assert_eq!(get("203.0.113.8, 10.0.0.1").await.unwrap().status(), 200);
    assert_eq!(app.state.rate_limiter.tracked_clients_count(), 2);
}

/// Test 3: Forwarded headers are ignored unless trusted
#[tokio::test]
async fn test_forwarded_for_untrusted() {
    let app = TestApp::spawn(limited_config(1)).await;

    let response = app
        .client
        .get(app.url("/v1/healthcheck"))
        .header("X-Forwarded-For", "203.0.113.7")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = app
        .client
        .get(app.url("/v1/healthcheck"))
        .header("X-Forwarded-For", "203.0.113.8")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

/// Test 4: A disabled limiter admits every request
#[tokio::test]
async fn test_disabled_limiter_admits_all() {
    let mut config = limited_config(1);
    config.limiter.enabled = false;
    let app = TestApp::spawn(config).await;

    for _ in 0..10 {
        let response = app.client.get(app.url("/v1/healthcheck")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }
    assert_eq!(app.state.rate_limiter.tracked_clients_count(), 0);
}

/// Test 5: Idle clients are swept and come back with a full bucket
#[tokio::test]
async fn test_idle_clients_swept() {
    let mut config = limited_config(1);
    config.limiter.idle_timeout_secs = 1;
    config.limiter.sweep_interval_secs = 1;
    let app = TestApp::spawn(config).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = Arc::clone(&app.state.rate_limiter).spawn_sweeper(shutdown_rx);

    assert_eq!(
        app.client.get(app.url("/v1/healthcheck")).send().await.unwrap().status(),
        200
    );
    assert_eq!(
        app.client.get(app.url("/v1/healthcheck")).send().await.unwrap().status(),
        429
    );
    assert_eq!(app.state.rate_limiter.tracked_clients_count(), 1);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(app.state.rate_limiter.tracked_clients_count(), 0);

    assert_eq!(
        app.client.get(app.url("/v1/healthcheck")).send().await.unwrap().status(),
        200
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
