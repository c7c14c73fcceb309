use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::oneshot;

use crate::auth::{Credential, CredentialStore, RefreshRequest, RefreshResponse, SessionSink};
use crate::error::RefreshError;

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError>;
}

/// Calls the identity service's refresh endpoint.
///
/// `client` must not contain the auth middlewares, otherwise a rejected
/// refresh would try to refresh itself.
pub struct HttpTokenRefresher {
    client: Arc<ClientWithMiddleware>,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(client: Arc<ClientWithMiddleware>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let refreshed = serde_json::from_slice::<RefreshResponse>(&body)
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if refreshed.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty accessToken".to_string()));
        }
        Ok(refreshed)
    }
}

type Waiter = oneshot::Sender<Result<Credential, RefreshError>>;

enum RefreshState {
    Idle,
    /// The caller that started the refresh is the first waiter.
    Refreshing { waiters: VecDeque<Waiter> },
}

struct CoordinatorInner {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    sink: Arc<dyn SessionSink>,
    timeout: Duration,
    state: Mutex<RefreshState>,
    refresh_count: AtomicUsize,
}

/// Single-flight credential refresh.
///
/// However many requests are rejected at once, only one refresh call is made.
/// Everybody else waits for its outcome in arrival order. A failed refresh
/// clears the store and tells the [`SessionSink`] the session is over.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        sink: Arc<dyn SessionSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                refresher,
                sink,
                timeout,
                state: Mutex::new(RefreshState::Idle),
                refresh_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Callers currently suspended on the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &*self.inner.lock_state() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Refresh calls issued so far.
    pub fn refresh_count(&self) -> usize {
        self.inner.refresh_count.load(Ordering::SeqCst)
    }

    /// Returns a credential to replay a rejected request with.
    ///
    /// `stale_access_token` is the token the rejected request carried. If the
    /// store already holds a different one, it is returned directly.
    pub async fn recover(
        &self,
        stale_access_token: Option<&str>,
    ) -> Result<Credential, RefreshError> {
        let receiver = {
            let mut state = self.inner.lock_state();

            let Some(current) = self.inner.store.get() else {
                debug!("No refresh token stored, leaving the rejection to the caller");
                return Err(RefreshError::MissingRefreshToken);
            };

            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    debug!("Queued behind in-flight refresh ({} waiting)", waiters.len());
                    rx
                }
                RefreshState::Idle => {
                    if stale_access_token != Some(current.access_token.as_str()) {
                        debug!("Access token already rotated, reusing current credential");
                        return Ok(current);
                    }

                    let (tx, rx) = oneshot::channel();
                    *state = RefreshState::Refreshing {
                        waiters: VecDeque::from([tx]),
                    };
                    // Spawned so that dropping the first caller cannot strand the queue.
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(inner.run_refresh(current.refresh_token));
                    rx
                }
            }
        };

        receiver.await.unwrap_or(Err(RefreshError::Aborted))
    }
}

/// Releases the queue with `Aborted` if the refresh task is dropped before it
/// finishes, for example on runtime shutdown. The stored session is left alone.
struct ReleaseOnDrop(Option<Arc<CoordinatorInner>>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            inner.release(Err(RefreshError::Aborted));
        }
    }
}

impl CoordinatorInner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_refresh(self: Arc<Self>, refresh_token: String) {
        let mut guard = ReleaseOnDrop(Some(Arc::clone(&self)));
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        info!("Access token rejected, refreshing session");

        let outcome =
            match tokio::time::timeout(self.timeout, self.refresher.refresh(&refresh_token)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(RefreshError::Timeout(self.timeout)),
            };

        // The store writes to disk, keep that off the async workers.
        let inner = Arc::clone(&self);
        let result = tokio::task::spawn_blocking(move || inner.conclude(outcome))
            .await
            .unwrap_or(Err(RefreshError::Aborted));

        guard.0 = None;
        self.release(result);
    }

    /// Applies a finished refresh to the store. A failure ends the session.
    ///
    /// Runs while the state is still `Refreshing`, so late arrivals queue up
    /// and receive this same outcome.
    fn conclude(
        &self,
        outcome: Result<RefreshResponse, RefreshError>,
    ) -> Result<Credential, RefreshError> {
        let result = outcome.and_then(|refreshed| self.install(refreshed));
        if let Err(err) = &result {
            warn!("Session refresh failed, signing out: {}", err);
            if let Err(err) = self.store.clear() {
                error!("Failed to clear credentials after refresh failure: {}", err);
            }
            self.sink.clear();
        }
        result
    }

    /// Returns to `Idle` and hands `result` to every waiter in arrival order.
    fn release(&self, result: Result<Credential, RefreshError>) {
        let waiters = match std::mem::replace(&mut *self.lock_state(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        };

        match &result {
            Ok(_) => info!("Session refreshed, releasing {} request(s)", waiters.len()),
            Err(err) => debug!("Rejecting {} queued request(s): {}", waiters.len(), err),
        }

        for waiter in waiters {
            // A waiter whose caller went away has nothing left to settle.
            let _ = waiter.send(result.clone());
        }
    }

    fn install(&self, refreshed: RefreshResponse) -> Result<Credential, RefreshError> {
        let rotated = self
            .store
            .rotate(refreshed.access_token, refreshed.refresh_token)
            .map_err(|e| RefreshError::Storage(e.to_string()))?;
        if !rotated {
            return Err(RefreshError::SessionEnded);
        }
        self.store.get().ok_or(RefreshError::SessionEnded)
    }
}
