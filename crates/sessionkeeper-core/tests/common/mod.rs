#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use sessionkeeper_core::{Config, Navigator, SessionClient, SessionState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const EXPIRED_TOKEN: &str = "expired-token";
pub const FRESH_TOKEN: &str = "fresh-token";

/// Navigator that records redirects instead of moving anywhere.
pub struct RecordingNavigator {
    location: Mutex<String>,
    redirects: AtomicUsize,
}

impl RecordingNavigator {
    pub fn at(location: &str) -> Arc<Self> {
        Arc::new(Self {
            location: Mutex::new(location.to_string()),
            redirects: AtomicUsize::new(0),
        })
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> String {
        self.location.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.lock().unwrap().clone()
    }

    fn redirect(&self, location: &str) {
        *self.location.lock().unwrap() = location.to_string();
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::with_base_url(server.uri());
    config.request_timeout_secs = 5;
    config.refresh_timeout_secs = 2;
    config.refresh_backoff_ms = 1;
    config
}

pub fn client(server: &MockServer, navigator: Arc<RecordingNavigator>) -> SessionClient {
    SessionClient::new(test_config(server), navigator).unwrap()
}

/// Login answers with an access token that the business endpoints will reject.
pub async fn mount_login(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "refresh=rt-123; Path=/auth; HttpOnly")
                .set_body_json(json!({
                    "accessToken": access_token,
                    "user": { "_id": "u1", "email": "registrar@school.test", "name": "Registrar", "role": "admin" }
                })),
        )
        .mount(server)
        .await;
}

pub fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({ "message": "jwt expired" }))
}

pub async fn logged_in(server: &MockServer, navigator: Arc<RecordingNavigator>) -> SessionClient {
    mount_login(server, EXPIRED_TOKEN).await;
    let client = client(server, navigator);
    client
        .login("registrar@school.test", "correct horse")
        .await
        .expect("login should succeed");
    assert_eq!(client.state(), SessionState::Authenticated);
    client
}

/// Wait until the session controller has settled into `expected`.
pub async fn wait_for_state(client: &SessionClient, expected: SessionState) {
    let mut states = client.session().subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == expected))
        .await
        .expect("timed out waiting for session state")
        .expect("session state channel closed");
}

/// Requests the mock server saw on `target` carrying `Bearer <token>`.
pub async fn requests_with_token(server: &MockServer, target: &str, token: &str) -> usize {
    let expected = format!("Bearer {}", token);
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .filter(|r| r.url.path() == target)
        .filter(|r| {
            r.headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|v| v == expected)
                .unwrap_or(false)
        })
        .count()
}

pub async fn requests_to(server: &MockServer, target: &str) -> usize {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .filter(|r| r.url.path() == target)
        .count()
}
