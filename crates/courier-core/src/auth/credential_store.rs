use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::{AuthError, CredentialPair};

/// Durable storage for the current credential pair.
///
/// Implementations must be safe to share between tasks; a pair is always replaced as a whole.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<CredentialPair>, AuthError>;
    fn set(&self, pair: &CredentialPair) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;

    /// Replace the access credential only while the stored refresh credential is still
    /// `expected_refresh`. Returns `false`, leaving the store untouched, when the pair was
    /// cleared or replaced in the meantime.
    fn update_access(&self, expected_refresh: &str, access: &str) -> Result<bool, AuthError>;
}

/// Filesystem-backed credential storage located in the user configuration directory.
pub struct FileCredentialStore {
    path: PathBuf,
    profile: String,
    // Serialises writers within the process; the rename makes each write atomic on disk.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(locator: &ConfigLocator, profile: impl Into<String>) -> Self {
        let profile = profile.into();
        Self {
            path: locator.credentials_file(&profile),
            profile,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_default_locator(profile: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self::new(&ConfigLocator::new()?, profile))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pair(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        let envelope = CredentialEnvelope {
            version: 1,
            profile: self.profile.clone(),
            access_token: Some(pair.access.clone()),
            refresh_token: Some(pair.refresh.clone()),
            updated_at: Utc::now(),
        };
        let payload = serde_json::to_string_pretty(&envelope)?;
        Self::write_file(&self.path, &payload)
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&staging)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perm = file.metadata()?.permissions();
                perm.set_mode(0o600);
                fs::set_permissions(&staging, perm)?;
            }
        }
        fs::rename(&staging, path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<CredentialPair>, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope: CredentialEnvelope = serde_json::from_str(&raw)?;
        Ok(envelope.into_pair())
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_pair(pair)
    }

    fn clear(&self) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn update_access(&self, expected_refresh: &str, access: &str) -> Result<bool, AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.get()? {
            Some(mut pair) if pair.refresh == expected_refresh => {
                pair.access = access.to_owned();
                self.write_pair(&pair)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Process-local store, useful for embedding and tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            inner: Mutex::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<CredentialPair>, AuthError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn update_access(&self, expected_refresh: &str, access: &str) -> Result<bool, AuthError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.as_mut() {
            Some(pair) if pair.refresh == expected_refresh => {
                pair.access = access.to_owned();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialEnvelope {
    version: u32,
    profile: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    updated_at: DateTime<Utc>,
}

impl CredentialEnvelope {
    // Either entry missing means the profile is unauthenticated.
    fn into_pair(self) -> Option<CredentialPair> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) => Some(CredentialPair { access, refresh }),
            _ => None,
        }
    }
}
