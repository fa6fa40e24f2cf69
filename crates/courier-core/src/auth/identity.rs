use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiError, ApiRequest};

use super::{AuthError, CredentialPair};

pub const LOGIN_PATH: &str = "/api/auth/token/";
pub const SIGNUP_PATH: &str = "/api/auth/signup/";
pub const VERIFY_PATH: &str = "/api/auth/token/verify/";
pub const USER_PATH: &str = "/api/auth/user/";

/// Registration details accepted by the signup endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Signup {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

/// Account returned by the current-user endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<i64>,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }
}

/// Calls to the identity namespace. These are never retried by the refresh coordinator.
#[derive(Clone)]
pub struct IdentityClient {
    api: ApiClient,
}

impl IdentityClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Exchange an email/password pair for a fresh credential pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, AuthError> {
        #[derive(Serialize)]
        struct Request<'a> {
            email: &'a str,
            password: &'a str,
        }

        #[derive(Deserialize)]
        struct TokenPair {
            access: String,
            refresh: String,
        }

        let tokens: TokenPair = self
            .api
            .post_json(LOGIN_PATH, &Request { email, password })
            .await
            .map_err(AuthError::from_identity)?;
        Ok(CredentialPair::new(tokens.access, tokens.refresh))
    }

    pub async fn signup(&self, signup: &Signup) -> Result<(), AuthError> {
        let request = ApiRequest::post(SIGNUP_PATH).json(signup)?;
        self.api
            .send(request)
            .await
            .map_err(AuthError::from_identity)?;
        Ok(())
    }

    /// Whether the server still accepts `token`.
    pub async fn verify(&self, token: &str) -> Result<bool, AuthError> {
        let request = ApiRequest::post(VERIFY_PATH).json(&serde_json::json!({ "token": token }))?;
        match self.api.send(request).await {
            Ok(_) => Ok(true),
            Err(ApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                ..
            }) => Ok(false),
            Err(err) => Err(AuthError::from_identity(err)),
        }
    }

    /// Fetch the account owning `access`; the credential is supplied explicitly.
    pub async fn current_user(&self, access: &str) -> Result<UserProfile, AuthError> {
        self.api
            .send_json(ApiRequest::get(USER_PATH).bearer(access))
            .await
            .map_err(AuthError::from_identity)
    }
}
