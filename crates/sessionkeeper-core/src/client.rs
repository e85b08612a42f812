//! Session-aware client.
//!
//! `SessionClient` builds the token holder, refresh coordinator, dispatcher
//! and session controller exactly once and wires them together, so there is
//! one coordinator (and one single-flight guarantee) per client.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Response;
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::{ApiError, AuthClient, HttpTransport, OutgoingRequest, RequestDispatcher};
use crate::auth::{
    Navigator, RefreshCoordinator, RefreshPolicy, SessionController, SessionState, TokenHolder,
};
use crate::config::Config;
use crate::models::{RegisterRequest, User};

pub struct SessionClient {
    coordinator: Arc<RefreshCoordinator>,
    dispatcher: RequestDispatcher,
    session: Arc<SessionController>,
    listener: JoinHandle<()>,
}

impl SessionClient {
    /// Build the client. Must be called from within a Tokio runtime.
    pub fn new(config: Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        config.validate()?;

        let http = HttpTransport::new(&config).context("Failed to build HTTP client")?;
        let auth = AuthClient::new(http.clone());

        let coordinator = Arc::new(RefreshCoordinator::new(
            auth.clone(),
            TokenHolder::new(),
            RefreshPolicy::from_config(&config),
        ));
        let dispatcher = RequestDispatcher::new(http, Arc::clone(&coordinator));
        let session = Arc::new(SessionController::new(
            auth,
            Arc::clone(&coordinator),
            navigator,
            config.login_location.clone(),
        ));
        let listener = session.spawn_event_listener();

        debug!(base_url = %config.base_url, "Session client ready");

        Ok(Self {
            coordinator,
            dispatcher,
            session,
            listener,
        })
    }

    pub fn tokens(&self) -> &TokenHolder {
        self.coordinator.tokens()
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub async fn bootstrap(&self) -> Result<SessionState, ApiError> {
        self.session.bootstrap().await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.session.login(email, password).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        self.session.register(request).await
    }

    pub async fn logout(&self) {
        self.session.logout().await
    }

    pub async fn dispatch(&self, request: OutgoingRequest) -> Result<Response, ApiError> {
        self.dispatcher.dispatch(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.dispatcher.get_json(path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.dispatcher.post_json(path, body).await
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
