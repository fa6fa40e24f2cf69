use reqwest::StatusCode;
use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

/// Errors surfaced by credential persistence and the identity endpoints.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("identity endpoint error {status}: {body}")]
    IdentityEndpoint { status: StatusCode, body: String },
    #[error("not signed in")]
    NotAuthenticated,
}

impl AuthError {
    /// Lift an API failure, keeping identity endpoint rejections distinct.
    pub(crate) fn from_identity(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => AuthError::IdentityEndpoint { status, body },
            other => AuthError::Api(other),
        }
    }
}
