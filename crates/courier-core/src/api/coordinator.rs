use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, SessionTerminator};

use super::{ApiRequest, RefreshError, Transport};

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

enum RefreshState {
    Idle,
    /// Waiters in arrival order; the first one triggered the refresh.
    Refreshing(Vec<Waiter>),
}

/// Single-flight coordinator for access credential refreshes.
///
/// Every caller whose protected request was rejected with 401 calls
/// [`RefreshCoordinator::await_fresh_token`]. The first caller while idle starts
/// exactly one refresh; later callers join the wait-list until it settles. All
/// waiters of one cycle observe the same outcome and are released in arrival order.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    terminator: Arc<dyn SessionTerminator>,
    refresh_path: String,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        terminator: Arc<dyn SessionTerminator>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            transport,
            terminator,
            refresh_path: refresh_path.into(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing(_))
    }

    /// Wait for the outcome of the current refresh cycle, starting one if none is in flight.
    ///
    /// The refresh runs on its own task, so dropping this future never strands other waiters.
    pub async fn await_fresh_token(self: &Arc<Self>) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(vec![tx]);
                    true
                }
                RefreshState::Refreshing(waiters) => {
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "refresh in flight; waiting");
                    false
                }
            }
        };

        if start {
            info!("access credential rejected; refreshing");
            let coordinator = Arc::clone(self);
            tokio::spawn(async move { coordinator.run_cycle().await });
        }

        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    async fn run_cycle(&self) {
        let mut in_flight = InFlight {
            coordinator: self,
            armed: true,
        };

        let outcome = self.refresh().await;
        match &outcome {
            // Store already empty; a login may have raced in since.
            Err(RefreshError::SignedOut) => warn!("credentials removed during refresh"),
            Err(error) => {
                warn!(%error, "refresh failed; ending session");
                if let Err(error) = self.store.clear() {
                    warn!(%error, "failed to clear credentials after refresh failure");
                }
            }
            Ok(_) => {}
        }

        let waiters = self.finish_cycle();
        in_flight.armed = false;

        match &outcome {
            Ok(_) => info!(waiters = waiters.len(), "refresh succeeded; releasing waiters"),
            Err(error) => self.terminator.terminate(error),
        }
        for waiter in waiters {
            // A receiver dropped by a cancelled caller is fine to skip.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn refresh(&self) -> Result<String, RefreshError> {
        let pair = self
            .store
            .get()
            .map_err(|err| RefreshError::Store(err.to_string()))?
            .ok_or(RefreshError::MissingRefreshToken)?;

        let mut request = ApiRequest::post(self.refresh_path.as_str());
        request.body = Some(json!({ "refresh": pair.refresh }));

        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let payload: RefreshResponse = serde_json::from_str(&response.body)
            .map_err(|err| RefreshError::MalformedResponse(err.to_string()))?;
        if payload.access.is_empty() {
            return Err(RefreshError::MalformedResponse(
                "empty access credential".into(),
            ));
        }

        let updated = self
            .store
            .update_access(&pair.refresh, &payload.access)
            .map_err(|err| RefreshError::Store(err.to_string()))?;
        if updated {
            return Ok(payload.access);
        }

        // The pair changed under us: a logout cleared it or a new login replaced it.
        match self
            .store
            .get()
            .map_err(|err| RefreshError::Store(err.to_string()))?
        {
            Some(current) => {
                debug!("credentials replaced during refresh; keeping the newer pair");
                Ok(current.access)
            }
            None => Err(RefreshError::SignedOut),
        }
    }

    /// Return to idle and hand back the waiters of the cycle that just ended.
    fn finish_cycle(&self) -> Vec<Waiter> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing(waiters) => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Refreshing(waiters) => waiters.len(),
            RefreshState::Idle => 0,
        }
    }
}

/// Drops the wait-list if a cycle is torn down before settling, so every waiter
/// observes [`RefreshError::Abandoned`] instead of hanging.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let abandoned = self.coordinator.finish_cycle();
            warn!(waiters = abandoned.len(), "refresh cycle abandoned");
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}
