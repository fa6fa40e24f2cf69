//! In-process fakes shared by the API tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::auth::SessionTerminator;
use crate::config::DEFAULT_REFRESH_ROUTE;

use super::{ApiRequest, ApiResponse, RefreshError, Transport, TransportError};

/// Transport that answers from a script instead of the network.
///
/// Protected paths return 200 for accepted bearer tokens and 401 otherwise.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    refresh_script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    gate: Option<Semaphore>,
    accepted: Mutex<Vec<String>>,
    rejected_paths: Mutex<Vec<String>>,
    public_paths: Mutex<Vec<String>>,
    fixed: Mutex<Vec<(String, StatusCode)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refresh(self, status: StatusCode, body: &str) -> Self {
        self.refresh_script
            .lock()
            .unwrap()
            .push_back(Ok(ApiResponse::new(status, body)));
        self
    }

    /// Like [`Self::refresh`], but refresh calls block until [`Self::open_gate`].
    pub(crate) fn gated_refresh(mut self, status: StatusCode, body: &str) -> Self {
        self.gate = Some(Semaphore::new(0));
        self.refresh(status, body)
    }

    pub(crate) fn refresh_failure(self, error: TransportError) -> Self {
        self.refresh_script.lock().unwrap().push_back(Err(error));
        self
    }

    pub(crate) fn accept(self, token: &str) -> Self {
        self.accepted.lock().unwrap().push(token.to_owned());
        self
    }

    pub(crate) fn reject_path(self, path: &str) -> Self {
        self.rejected_paths.lock().unwrap().push(path.to_owned());
        self
    }

    pub(crate) fn public_path(self, path: &str) -> Self {
        self.public_paths.lock().unwrap().push(path.to_owned());
        self
    }

    pub(crate) fn fixed_status(self, path: &str, status: StatusCode) -> Self {
        self.fixed.lock().unwrap().push((path.to_owned(), status));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_requests().len()
    }

    pub(crate) fn refresh_bodies(&self) -> Vec<serde_json::Value> {
        self.refresh_requests()
            .into_iter()
            .filter_map(|request| request.body)
            .collect()
    }

    fn refresh_requests(&self) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path.ends_with(DEFAULT_REFRESH_ROUTE))
            .collect()
    }
}

pub(crate) fn bearer_of(request: &ApiRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        if request.path.ends_with(DEFAULT_REFRESH_ROUTE) {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let next = self.refresh_script.lock().unwrap().pop_front();
            return next.unwrap_or_else(|| {
                Ok(ApiResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "unscripted refresh",
                ))
            });
        }

        if self.public_paths.lock().unwrap().contains(&request.path) {
            return Ok(ApiResponse::new(StatusCode::CREATED, "{}"));
        }

        let fixed = self
            .fixed
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| *path == request.path)
            .map(|(_, status)| *status);
        if let Some(status) = fixed {
            return Ok(ApiResponse::new(status, "{}"));
        }

        let token = bearer_of(request);
        let rejected = self.rejected_paths.lock().unwrap().contains(&request.path);
        let accepted = token
            .as_ref()
            .is_some_and(|token| self.accepted.lock().unwrap().contains(token));
        if rejected || !accepted {
            return Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail":"Given token not valid for any token type"}"#,
            ));
        }

        let body = json!({ "path": request.path, "token": token });
        Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
    }
}

/// Session terminator that only counts its invocations.
#[derive(Default)]
pub(crate) struct RecordingTerminator {
    calls: AtomicUsize,
    errors: Mutex<Vec<RefreshError>>,
}

impl RecordingTerminator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn errors(&self) -> Vec<RefreshError> {
        self.errors.lock().unwrap().clone()
    }
}

impl SessionTerminator for RecordingTerminator {
    fn terminate(&self, error: &RefreshError) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.errors.lock().unwrap().push(error.clone());
    }
}
