use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Failure to complete a call at the network level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Why a refresh cycle failed. Cloned to every waiter released by that cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh credential is stored")]
    MissingRefreshToken,
    #[error("refresh rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),
    #[error("refresh call failed: {0}")]
    Transport(#[from] TransportError),
    #[error("credential store error during refresh: {0}")]
    Store(String),
    #[error("credentials were removed while the refresh was in flight")]
    SignedOut,
    #[error("refresh ended without a result")]
    Abandoned,
}

/// Errors returned to callers of the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("HTTP status {status} body: {body}")]
    Status { status: StatusCode, body: String },
    #[error("session expired: {0}")]
    SessionExpired(#[source] RefreshError),
    #[error("failed to deserialize response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to serialize request body: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the failure ended the session and the user has to sign in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
