//! Single-flight access token refresh.
//!
//! `RefreshCoordinator` guarantees that at most one refresh call is in flight
//! at a time. Every caller that needs a new token while an episode is running
//! is queued behind it and released with the same outcome.
//!
//! ```text
//!            await_refresh()                      refresh ok
//!   [Idle] ─────────────────→ [Refreshing] ──────────────────→ [Idle]
//!                                  │        token written, waiters released
//!                                  │
//!                                  │ refresh failed
//!                                  └──────────────────────────→ [Idle]
//!                                    token cleared, waiters rejected,
//!                                    one Invalidated event published
//! ```
//!
//! The network call runs on a spawned task, so a caller that drops its future
//! mid-refresh never leaves the coordinator stuck in `Refreshing`. A panic in
//! the token source is caught at the task boundary and fails the episode with
//! [`RefreshError::Abandoned`].
//!
//! Login and logout bump a generation counter. An episode that finishes after
//! the session changed under it is superseded: its outcome is discarded and
//! never written into the holder.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::token::{AccessToken, TokenHolder};
use crate::api::{AuthClient, RefreshError};
use crate::config::Config;

/// Capacity of the refresh event channel.
/// Events are rare (one or two per episode), 16 leaves room for slow subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Mints a new access token from the transport-held refresh credential.
pub trait TokenSource: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = Result<AccessToken, RefreshError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Published once per episode transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Started { episode: u64 },
    Refreshed { episode: u64 },
    /// Login or logout happened while the episode ran; its outcome was dropped.
    Superseded { episode: u64 },
    /// The session is gone. Sent exactly once per failed episode,
    /// independently of how many waiters were rejected.
    Invalidated { episode: u64, error: RefreshError },
}

/// Timeout and retry settings for one refresh episode.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Upper bound on a single refresh call.
    pub timeout: Duration,
    /// Extra attempts after a transient failure. Authoritative rejections are never retried.
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RefreshPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.refresh_timeout_secs),
            retries: config.refresh_retries,
            initial_backoff: Duration::from_millis(config.refresh_backoff_ms),
        }
    }
}

type Waiter = oneshot::Sender<Result<AccessToken, RefreshError>>;

/// What an episode needs to remember from the moment it started.
struct Episode {
    id: u64,
    generation: u64,
    /// Holder contents when the episode began.
    replacing: Option<AccessToken>,
}

struct Inner {
    state: RefreshState,
    waiters: Vec<Waiter>,
    episode: u64,
    /// Bumped whenever the token is installed or cleared outside a refresh.
    generation: u64,
    /// Token rejected by the last failed episode, with that episode's error.
    invalidated: Option<(AccessToken, RefreshError)>,
}

pub struct RefreshCoordinator<S = AuthClient> {
    source: S,
    tokens: TokenHolder,
    policy: RefreshPolicy,
    inner: Mutex<Inner>,
    events: broadcast::Sender<RefreshEvent>,
}

impl<S: TokenSource> RefreshCoordinator<S> {
    pub fn new(source: S, tokens: TokenHolder, policy: RefreshPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            tokens,
            policy,
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                waiters: Vec::new(),
                episode: 0,
                generation: 0,
                invalidated: None,
            }),
            events,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.lock().state
    }

    pub fn tokens(&self) -> &TokenHolder {
        &self.tokens
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    /// Store a token obtained outside a refresh (login, registration).
    pub fn install_token(&self, token: AccessToken) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.invalidated = None;
        self.tokens.set(token);
    }

    pub fn clear_token(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        self.tokens.clear();
    }

    /// Obtain a fresh access token, joining the in-flight refresh if there is one.
    ///
    /// `stale` is the token the failing request was sent with. If the holder
    /// already has a different token, a refresh finished in the meantime and
    /// that token is returned without another network call. If `stale` is
    /// the token the last failed episode gave up on, that failure is returned
    /// instead of starting a new episode.
    ///
    /// # Errors
    /// Returns the episode's [`RefreshError`]; every caller queued behind the
    /// same episode receives an identical error.
    pub async fn await_refresh(
        self: &Arc<Self>,
        stale: Option<&AccessToken>,
    ) -> Result<AccessToken, RefreshError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            match inner.state {
                RefreshState::Refreshing => {
                    inner.waiters.push(tx);
                    debug!(
                        episode = inner.episode,
                        waiters = inner.waiters.len(),
                        "Refresh in flight, queued behind it"
                    );
                }
                RefreshState::Idle => {
                    let current = self.tokens.get();
                    if let Some(current) = &current {
                        if stale != Some(current) {
                            debug!("Token already replaced since the request was sent");
                            return Ok(current.clone());
                        }
                    }
                    if let (Some(stale), Some((rejected, error))) = (stale, &inner.invalidated) {
                        if stale == rejected {
                            debug!(error = %error, "Token already rejected by the last refresh");
                            return Err(error.clone());
                        }
                    }

                    inner.state = RefreshState::Refreshing;
                    inner.episode += 1;
                    inner.waiters.push(tx);

                    let episode = Episode {
                        id: inner.episode,
                        generation: inner.generation,
                        replacing: current,
                    };
                    debug!(episode = episode.id, "Starting token refresh");
                    let _ = self.events.send(RefreshEvent::Started { episode: episode.id });

                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.run_episode(episode).await });
                }
            }
        }

        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    async fn run_episode(self: Arc<Self>, episode: Episode) {
        let id = episode.id;
        let this = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { this.refresh_with_retries(id).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(episode = id, error = %e, "Refresh task died before completing");
                Err(RefreshError::Abandoned)
            }
        };

        // Token write and waiter drain form one critical section: a caller
        // arriving afterwards sees Idle plus the final token, never a mix.
        let (outcome, superseded, waiters) = {
            let mut inner = self.lock();
            let superseded = inner.generation != episode.generation;
            let outcome = if superseded {
                // Whatever login/logout left in the holder wins
                self.tokens.get().ok_or(RefreshError::Superseded)
            } else {
                match &outcome {
                    Ok(token) => {
                        self.tokens.set(token.clone());
                        inner.invalidated = None;
                    }
                    Err(e) => {
                        self.tokens.clear();
                        inner.invalidated = episode.replacing.map(|token| (token, e.clone()));
                    }
                }
                outcome
            };
            inner.state = RefreshState::Idle;
            (outcome, superseded, std::mem::take(&mut inner.waiters))
        };

        if superseded {
            info!(episode = id, waiters = waiters.len(), "Session changed during refresh, outcome discarded");
            let _ = self.events.send(RefreshEvent::Superseded { episode: id });
        } else {
            match &outcome {
                Ok(_) => {
                    info!(episode = id, waiters = waiters.len(), "Access token refreshed");
                    let _ = self.events.send(RefreshEvent::Refreshed { episode: id });
                }
                Err(e) => {
                    warn!(episode = id, waiters = waiters.len(), error = %e, "Token refresh failed, invalidating session");
                    let _ = self.events.send(RefreshEvent::Invalidated {
                        episode: id,
                        error: e.clone(),
                    });
                }
            }
        }

        for waiter in waiters {
            // Receiver gone means the caller was cancelled; nothing to deliver
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn refresh_with_retries(&self, episode: u64) -> Result<AccessToken, RefreshError> {
        let mut attempt = 0;
        let mut backoff = self.policy.initial_backoff;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.timeout, self.source.refresh()).await {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Timeout),
            };

            match result {
                Ok(token) => return Ok(token),
                Err(e) if e.is_transient() && attempt <= self.policy.retries => {
                    let delay = jittered(backoff);
                    warn!(
                        episode,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient refresh failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 70-100% of the nominal delay so concurrent clients don't retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let factor: u32 = rand::thread_rng().gen_range(70..=100);
    delay * factor / 100
}
