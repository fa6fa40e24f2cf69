use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::api::RefreshError;

/// Receives the terminal failure of a refresh cycle. Called once per failed cycle.
pub trait SessionTerminator: Send + Sync {
    fn terminate(&self, error: &RefreshError);
}

/// Application-level identity shared with whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    SignedOut,
    Authenticated { email: String },
    LoginRequired { reason: String, login_url: Url },
}

/// Publishes session changes on a `watch` channel.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<SessionStatus>>,
}

impl SessionHandle {
    pub fn new(initial: SessionStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, status: SessionStatus) {
        self.tx.send_replace(status);
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new(SessionStatus::SignedOut)
    }
}

/// Forgets the cached identity and points the user at the login surface.
pub struct LoginRedirect {
    session: SessionHandle,
    login_url: Url,
    open_browser: bool,
}

impl LoginRedirect {
    pub fn new(session: SessionHandle, login_url: Url) -> Self {
        Self {
            session,
            login_url,
            open_browser: false,
        }
    }

    /// Also open the login page in the system browser.
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }
}

impl SessionTerminator for LoginRedirect {
    fn terminate(&self, error: &RefreshError) {
        info!(login_url = %self.login_url, %error, "session ended; sign-in required");
        self.session.publish(SessionStatus::LoginRequired {
            reason: error.to_string(),
            login_url: self.login_url.clone(),
        });
        if self.open_browser {
            if let Err(error) = open::that(self.login_url.as_str()) {
                warn!(%error, "failed to open login page");
            }
        }
    }
}
