//! Session state and its reaction to refresh outcomes.
//!
//! ## Lifecycle
//!
//! ```text
//!                 login()                     refresh started
//! [Anonymous] ──────────→ [Authenticating] ──→ [Authenticated] ⇄ [Refreshing]
//!      ▲                                             │               │
//!      │ redirect to login                  logout() │               │ refresh failed
//!      └──────────────── [LoggedOut] ◄───────────────┼───────────────┘
//!      ▲                                             │
//!      └─────────────────────────────────────────────┘
//! ```
//!
//! `Refreshing` is transparent to callers: requests keep working and simply
//! wait for the new token.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::refresh::{RefreshCoordinator, RefreshEvent, TokenSource};
use super::token::AccessToken;
use crate::api::{ApiError, AuthClient, RefreshError};
use crate::models::{LoginResponse, RegisterRequest, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    LoggedOut,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::LoggedOut => "logged_out",
        }
    }

    /// Authenticated, including while a refresh is running.
    pub fn is_authenticated(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }
}

/// Moves the user to another surface (the login page, in practice).
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;
    fn redirect(&self, location: &str);
}

pub struct SessionController<S = AuthClient> {
    auth: AuthClient,
    coordinator: Arc<RefreshCoordinator<S>>,
    navigator: Arc<dyn Navigator>,
    login_location: String,
    state: watch::Sender<SessionState>,
    user: RwLock<Option<User>>,
}

impl<S: TokenSource> SessionController<S> {
    pub fn new(
        auth: AuthClient,
        coordinator: Arc<RefreshCoordinator<S>>,
        navigator: Arc<dyn Navigator>,
        login_location: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        Self {
            auth,
            coordinator,
            navigator,
            login_location: login_location.into(),
            state,
            user: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes (for a UI layer).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Startup probe: resume an existing session if the server still knows us.
    ///
    /// A 401 is the normal answer for anonymous visitors and resolves to
    /// [`SessionState::Anonymous`] without an error or redirect.
    pub async fn bootstrap(&self) -> Result<SessionState, ApiError> {
        let token = self.coordinator.tokens().get();
        match self.auth.me(token.as_ref()).await {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Resumed existing session");
                self.set_user(Some(user));
                self.transition(SessionState::Authenticated);
            }
            Ok(None) => {
                debug!("No active session, continuing anonymously");
                if token.is_some() {
                    self.coordinator.clear_token();
                }
                self.set_user(None);
                self.transition(SessionState::Anonymous);
            }
            Err(e) => {
                warn!(error = %e, "Session probe failed");
                return Err(e);
            }
        }
        Ok(self.state())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.transition(SessionState::Authenticating);
        match self.auth.login(email, password).await {
            Ok(response) => Ok(self.establish(response)),
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.transition(SessionState::Anonymous);
                Err(e)
            }
        }
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        self.transition(SessionState::Authenticating);
        match self.auth.register(request).await {
            Ok(response) => Ok(self.establish(response)),
            Err(e) => {
                warn!(error = %e, "Registration failed");
                self.transition(SessionState::Anonymous);
                Err(e)
            }
        }
    }

    /// End the session. The server call is best-effort; local state is
    /// always cleared.
    pub async fn logout(&self) {
        let token = self.coordinator.tokens().get();
        if let Err(e) = self.auth.logout(token.as_ref()).await {
            warn!(error = %e, "Server-side logout failed, clearing local session anyway");
        }
        self.coordinator.clear_token();
        self.set_user(None);
        self.transition(SessionState::Anonymous);
        info!("Logged out");
    }

    /// React to one refresh coordinator event.
    pub fn handle_event(&self, event: &RefreshEvent) {
        match event {
            RefreshEvent::Started { .. } => {
                self.state.send_if_modified(|s| {
                    let authenticated = *s == SessionState::Authenticated;
                    if authenticated {
                        *s = SessionState::Refreshing;
                    }
                    authenticated
                });
            }
            RefreshEvent::Refreshed { .. } => {
                self.state.send_if_modified(|s| {
                    // Only a session that was refreshing resumes; a logged-out one stays out
                    let resumed = *s == SessionState::Refreshing;
                    if resumed {
                        *s = SessionState::Authenticated;
                    }
                    resumed
                });
            }
            RefreshEvent::Superseded { episode } => {
                debug!(episode, "Refresh superseded by login or logout");
                let next = if self.current_user().is_some() {
                    SessionState::Authenticated
                } else {
                    SessionState::Anonymous
                };
                self.state.send_if_modified(|s| {
                    let stuck = *s == SessionState::Refreshing;
                    if stuck {
                        *s = next;
                    }
                    stuck
                });
            }
            RefreshEvent::Invalidated { episode, error } => self.invalidate(*episode, error),
        }
    }

    /// Forward coordinator events to [`handle_event`](Self::handle_event) on a
    /// background task until either side is dropped.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before spawning so no event between now and the first poll is missed
        let mut events = self.coordinator.subscribe();
        let controller = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match controller.upgrade() {
                        Some(controller) => controller.handle_event(&event),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session listener lagged behind refresh events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Session event listener stopped");
        })
    }

    fn establish(&self, response: LoginResponse) -> User {
        self.coordinator.install_token(AccessToken::new(response.access_token));
        info!(user_id = %response.user.id, "Authenticated");
        self.set_user(Some(response.user.clone()));
        self.transition(SessionState::Authenticated);
        response.user
    }

    fn invalidate(&self, episode: u64, error: &RefreshError) {
        warn!(episode, error = %error, "Session invalidated");
        self.coordinator.clear_token();
        self.set_user(None);
        self.transition(SessionState::LoggedOut);
        self.redirect_to_login();
        self.transition(SessionState::Anonymous);
    }

    /// Returns false when already on the login surface.
    fn redirect_to_login(&self) -> bool {
        let current = self.navigator.current_location();
        let current_path = current.split(['?', '#']).next().unwrap_or_default();
        if current_path == self.login_location {
            debug!("Already at login, skipping redirect");
            return false;
        }
        self.navigator.redirect(&self.login_location);
        true
    }

    fn set_user(&self, user: Option<User>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = previous.as_str(), to = next.as_str(), "Session state changed");
        }
    }
}
