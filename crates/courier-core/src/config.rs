use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use reqwest::Method;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_IDENTITY_NAMESPACE: &str = "/auth/";
pub const DEFAULT_REFRESH_ROUTE: &str = "/auth/token/refresh/";
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/token/refresh/";
pub const SUPPORT_REQUESTS_PATH: &str = "/api/support-requests/";

const ENV_API_URL: &str = "COURIER_API_URL";
const ENV_TIMEOUT: &str = "COURIER_API_TIMEOUT_SECS";
const ENV_LOGIN_URL: &str = "COURIER_LOGIN_URL";
const ENV_PROFILE: &str = "COURIER_PROFILE";

/// Locates the per-user configuration directory holding persisted credentials.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("com", "parcelmybox", "courier-rs")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory instead of the platform default.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    /// Path to the credentials file for the given profile.
    pub fn credentials_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("credentials-{profile}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// A `(method, path)` pair that must never carry credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousRoute {
    pub method: Method,
    pub path: String,
}

impl AnonymousRoute {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Settings for the authenticated API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub login_url: Url,
    pub profile: String,
    pub identity_namespace: String,
    pub refresh_route: String,
    pub refresh_path: String,
    pub anonymous_routes: Vec<AnonymousRoute>,
}

impl ApiConfig {
    /// Build a configuration for `base_url` with every other setting at its default.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = parse_base_url(base_url)?;
        let login_url = base_url.join("login").map_err(ConfigError::InvalidUrl)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            login_url,
            profile: DEFAULT_PROFILE.to_owned(),
            identity_namespace: DEFAULT_IDENTITY_NAMESPACE.to_owned(),
            refresh_route: DEFAULT_REFRESH_ROUTE.to_owned(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            anonymous_routes: vec![AnonymousRoute::new(Method::POST, SUPPORT_REQUESTS_PATH)],
        })
    }

    /// Read the configuration from `COURIER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = non_empty(lookup(ENV_API_URL)).unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let mut config = Self::new(&base)?;

        if let Some(raw) = non_empty(lookup(ENV_TIMEOUT)) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout(raw))?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = non_empty(lookup(ENV_LOGIN_URL)) {
            config.login_url = Url::parse(&raw).map_err(ConfigError::InvalidUrl)?;
        }

        if let Some(profile) = non_empty(lookup(ENV_PROFILE)) {
            config.profile = profile;
        }

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_anonymous_route(mut self, route: AnonymousRoute) -> Self {
        self.anonymous_routes.push(route);
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(ConfigError::InvalidUrl)?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::NotABase(raw.to_owned()));
    }
    // `Url::join` drops the last segment unless the base ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for courier-rs")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[source] url::ParseError),
    #[error("URL '{0}' cannot be used as an API base")]
    NotABase(String),
    #[error("invalid timeout '{0}': expected a positive number of seconds")]
    InvalidTimeout(String),
    #[error("anonymous route {method} {path} overlaps the {overlaps} route")]
    AmbiguousRoute {
        method: Method,
        path: String,
        overlaps: &'static str,
    },
    #[error("refresh path '{path}' does not match the refresh route '{route}'")]
    RefreshPathMismatch { path: String, route: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn credentials_file_appends_profile() {
        let temp_dir = TempDir::new().unwrap();
        let locator = ConfigLocator::from_root(temp_dir.path().to_path_buf()).unwrap();
        let path = locator.credentials_file("default");
        assert!(path.ends_with("credentials-default.json"));
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.login_url.as_str(), "http://localhost:8000/login");
        assert_eq!(config.profile, "default");
        assert_eq!(
            config.anonymous_routes,
            vec![AnonymousRoute::new(Method::POST, "/api/support-requests/")]
        );
    }

    #[test]
    fn environment_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("COURIER_API_URL", "https://api.parcelmybox.com/v1"),
            ("COURIER_API_TIMEOUT_SECS", "3"),
            ("COURIER_LOGIN_URL", "https://parcelmybox.com/login"),
            ("COURIER_PROFILE", "staging"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.as_str(), "https://api.parcelmybox.com/v1/");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.login_url.as_str(), "https://parcelmybox.com/login");
        assert_eq!(config.profile, "staging");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[("COURIER_API_URL", "  ")])).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8000/");
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = ApiConfig::from_lookup(lookup(&[("COURIER_API_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(value) if value == "0"));
    }

    #[test]
    fn rejects_unparsable_base() {
        let err = ApiConfig::new("not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
