mod classify;
mod client;
mod coordinator;
mod error;
mod interceptor;
mod request;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{EndpointClass, EndpointClassifier};
pub use client::ApiClient;
pub use coordinator::RefreshCoordinator;
pub use error::{ApiError, ApiResult, RefreshError, TransportError};
pub use interceptor::RequestInterceptor;
pub use request::{ApiRequest, ApiResponse, CredentialMode};
pub use transport::{ReqwestTransport, Transport};
