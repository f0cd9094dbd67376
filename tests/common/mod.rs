//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use movies_api::config::Config;
use movies_api::database::{Database, SqliteDatabase};
use movies_api::models::{Token, User};
use movies_api::notifier::{Notifier, NotifyError};
use movies_api::server::{build_router, AppState};

/// Notifier that keeps the last activation token sent to each email
#[derive(Default)]
pub struct CapturingNotifier {
    tokens: Mutex<HashMap<String, String>>,
}

impl CapturingNotifier {
    pub fn token_for(&self, email: &str) -> Option<String> {
        self.tokens.lock().unwrap().get(email).cloned()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), NotifyError> {
        self.tokens
            .lock()
            .unwrap()
            .insert(user.email.clone(), token.plaintext.clone());
        Ok(())
    }
}

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Configuration with the rate limiter switched off
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.limiter.enabled = false;
    config
}

/// Create a test application state
pub async fn create_test_state(
    config: &Config,
) -> (AppState<SqliteDatabase>, Arc<CapturingNotifier>) {
    let database = create_test_database().await;
    let notifier = Arc::new(CapturingNotifier::default());
    let state = AppState::new(database, config, notifier.clone());
    (state, notifier)
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server<D: Database + 'static>(
    state: AppState<D>,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    (addr, shutdown_tx)
}

/// A running server with its notifier and an HTTP client
pub struct TestApp<D: Database + 'static = SqliteDatabase> {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub notifier: Arc<CapturingNotifier>,
    pub state: AppState<D>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl TestApp<SqliteDatabase> {
    pub async fn spawn(config: Config) -> Self {
        Self::spawn_with_database(config, create_test_database().await).await
    }
}

impl<D: Database + 'static> TestApp<D> {
    /// Serve the full router over `database`
    pub async fn spawn_with_database(config: Config, database: Arc<D>) -> Self {
        let notifier = Arc::new(CapturingNotifier::default());
        let state = AppState::new(database, &config, notifier.clone());
        let (addr, shutdown) = run_test_server(state.clone()).await;

        Self {
            addr,
            client: reqwest::Client::new(),
            notifier,
            state,
            _shutdown: shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/v1/users"))
            .json(&json!({ "name": name, "email": email, "password": password }))
            .send()
            .await
            .expect("register request failed")
    }

    /// Wait for the background notifier to deliver the activation token
    pub async fn activation_token(&self, email: &str) -> String {
        for _ in 0..100 {
            if let Some(token) = self.notifier.token_for(email) {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no activation token delivered for {}", email);
    }

    pub async fn activate(&self, token: &str) -> reqwest::Response {
        self.client
            .put(self.url("/v1/users/activated"))
            .json(&json!({ "token": token }))
            .send()
            .await
            .expect("activate request failed")
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/v1/tokens/authentication"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("login request failed")
    }

    /// Register, activate and log in; returns the bearer token
    pub async fn activated_user_token(&self, email: &str) -> String {
        let password = "pa55word1234";

        let response = self.register("Test User", email, password).await;
        assert_eq!(response.status(), 202);

        let token = self.activation_token(email).await;
        let response = self.activate(&token).await;
        assert_eq!(response.status(), 200);

        let response = self.login(email, password).await;
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        body["authentication_token"]["token"]
            .as_str()
            .expect("token missing")
            .to_string()
    }

    /// Create a movie and return its JSON representation
    pub async fn create_movie(&self, bearer: &str, body: serde_json::Value) -> serde_json::Value {
        let response = self
            .client
            .post(self.url("/v1/movies"))
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .expect("create movie request failed");
        assert_eq!(response.status(), 201);

        let body: serde_json::Value = response.json().await.unwrap();
        body["movie"].clone()
    }
}
