use std::sync::Arc;

use tracing::info;

use super::{
    AuthError, CredentialPair, CredentialStore, IdentityClient, SessionHandle, SessionStatus,
    Signup, UserProfile,
};

/// Coordinates sign-in, persistence of credentials, and the published session status.
pub struct AuthManager {
    identity: IdentityClient,
    store: Arc<dyn CredentialStore>,
    session: SessionHandle,
}

impl AuthManager {
    pub fn new(
        identity: IdentityClient,
        store: Arc<dyn CredentialStore>,
        session: SessionHandle,
    ) -> Self {
        Self {
            identity,
            store,
            session,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn current_credentials(&self) -> Result<Option<CredentialPair>, AuthError> {
        self.store.get()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, AuthError> {
        let pair = self.identity.login(email, password).await?;
        self.store.set(&pair)?;
        info!(email, "signed in");
        self.session.publish(SessionStatus::Authenticated {
            email: email.to_owned(),
        });
        Ok(pair)
    }

    /// Register a new account and sign straight into it.
    pub async fn signup(&self, signup: &Signup) -> Result<CredentialPair, AuthError> {
        self.identity.signup(signup).await?;
        self.login(&signup.email, &signup.password).await
    }

    /// Look up the signed-in account and publish it as the current session.
    pub async fn restore_session(&self) -> Result<Option<UserProfile>, AuthError> {
        let Some(pair) = self.store.get()? else {
            self.session.publish(SessionStatus::SignedOut);
            return Ok(None);
        };
        let user = self.identity.current_user(&pair.access).await?;
        self.session.publish(SessionStatus::Authenticated {
            email: user.email.clone(),
        });
        Ok(Some(user))
    }

    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let pair = self.store.get()?.ok_or(AuthError::NotAuthenticated)?;
        self.identity.current_user(&pair.access).await
    }

    /// Ask the server whether the stored access credential is still accepted.
    pub async fn verify(&self) -> Result<bool, AuthError> {
        match self.store.get()? {
            Some(pair) => self.identity.verify(&pair.access).await,
            None => Ok(false),
        }
    }

    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()?;
        self.session.publish(SessionStatus::SignedOut);
        info!("signed out");
        Ok(())
    }
}
