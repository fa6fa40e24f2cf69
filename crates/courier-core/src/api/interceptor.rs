use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE};
use tracing::warn;

use crate::auth::CredentialStore;

use super::request::bearer_value;
use super::{ApiRequest, CredentialMode, EndpointClass, EndpointClassifier};

/// Applies the credential policy of each endpoint class to outgoing requests.
#[derive(Clone)]
pub struct RequestInterceptor {
    classifier: Arc<EndpointClassifier>,
    store: Arc<dyn CredentialStore>,
}

impl RequestInterceptor {
    pub fn new(classifier: Arc<EndpointClassifier>, store: Arc<dyn CredentialStore>) -> Self {
        Self { classifier, store }
    }

    pub fn classify(&self, request: &ApiRequest) -> EndpointClass {
        self.classifier.classify(&request.path, &request.method)
    }

    /// Attach, strip or leave credentials according to the request's class.
    pub fn prepare(&self, mut request: ApiRequest) -> ApiRequest {
        match self.classify(&request) {
            EndpointClass::Protected => {
                let access = match self.store.get() {
                    Ok(pair) => pair.map(|pair| pair.access),
                    Err(error) => {
                        warn!(%error, "credential store unreadable; sending unauthenticated");
                        None
                    }
                };
                if let Some(value) = access.as_deref().and_then(bearer_value) {
                    request.headers.insert(AUTHORIZATION, value);
                }
                request
            }
            EndpointClass::Anonymous => strip_credentials(request),
            EndpointClass::IdentityEndpoint | EndpointClass::RefreshEndpoint => request,
        }
    }

    /// Prepare a replay with the token delivered by the refresh that released it.
    pub fn prepare_replay(&self, mut request: ApiRequest, access: &str) -> ApiRequest {
        if let Some(value) = bearer_value(access) {
            request.headers.insert(AUTHORIZATION, value);
        }
        request
    }
}

fn strip_credentials(mut request: ApiRequest) -> ApiRequest {
    request.headers.remove(AUTHORIZATION);
    request.headers.remove(COOKIE);
    request.credentials = CredentialMode::Omit;
    request
}
