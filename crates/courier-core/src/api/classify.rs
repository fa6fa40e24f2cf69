use reqwest::Method;
use tracing::debug;

use crate::config::{AnonymousRoute, ApiConfig, ConfigError};

/// How an outgoing call is treated with respect to credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Never carries credentials, even when some are stored.
    Anonymous,
    /// Login/signup namespace: no attachment and no refresh handling.
    IdentityEndpoint,
    /// The refresh call itself; never intercepted or retried.
    RefreshEndpoint,
    /// Everything else: carries the current access credential.
    Protected,
}

impl EndpointClass {
    /// Only protected calls take part in refresh and replay.
    pub fn is_refreshable(self) -> bool {
        matches!(self, EndpointClass::Protected)
    }
}

/// Pure mapping from `(path, method)` to an [`EndpointClass`].
#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    identity_namespace: String,
    refresh_route: String,
    anonymous: Vec<AnonymousRoute>,
}

impl EndpointClassifier {
    /// Build a classifier, rejecting anonymous routes that would also match another class.
    pub fn new(
        identity_namespace: impl Into<String>,
        refresh_route: impl Into<String>,
        anonymous: Vec<AnonymousRoute>,
    ) -> Result<Self, ConfigError> {
        let classifier = Self {
            identity_namespace: identity_namespace.into(),
            refresh_route: refresh_route.into(),
            anonymous,
        };
        for route in &classifier.anonymous {
            if classifier.is_refresh(&route.path) {
                return Err(ConfigError::AmbiguousRoute {
                    method: route.method.clone(),
                    path: route.path.clone(),
                    overlaps: "refresh",
                });
            }
            if classifier.is_identity(&route.path) {
                return Err(ConfigError::AmbiguousRoute {
                    method: route.method.clone(),
                    path: route.path.clone(),
                    overlaps: "identity",
                });
            }
        }
        Ok(classifier)
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.identity_namespace.clone(),
            config.refresh_route.clone(),
            config.anonymous_routes.clone(),
        )
    }

    pub fn classify(&self, path: &str, method: &Method) -> EndpointClass {
        let path = strip_query(path);
        let class = if self.is_refresh(path) {
            EndpointClass::RefreshEndpoint
        } else if self
            .anonymous
            .iter()
            .any(|route| route.method == *method && path == route.path)
        {
            EndpointClass::Anonymous
        } else if self.is_identity(path) {
            EndpointClass::IdentityEndpoint
        } else {
            EndpointClass::Protected
        };
        debug!(%method, path, ?class, "classified request");
        class
    }

    pub fn refresh_route(&self) -> &str {
        &self.refresh_route
    }

    fn is_refresh(&self, path: &str) -> bool {
        path.ends_with(self.refresh_route.as_str())
    }

    fn is_identity(&self, path: &str) -> bool {
        path.contains(self.identity_namespace.as_str())
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}
