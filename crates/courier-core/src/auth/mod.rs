mod credential_store;
mod error;
mod identity;
mod orchestrator;
mod session;
mod terminator;

pub use credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::AuthError;
pub use identity::{
    IdentityClient, Signup, UserProfile, LOGIN_PATH, SIGNUP_PATH, USER_PATH, VERIFY_PATH,
};
pub use orchestrator::AuthManager;
pub use session::CredentialPair;
pub use terminator::{LoginRedirect, SessionHandle, SessionStatus, SessionTerminator};
