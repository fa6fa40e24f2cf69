use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::{CredentialStore, SessionTerminator};
use crate::config::{ApiConfig, ConfigError};

use super::{
    ApiError, ApiRequest, ApiResponse, ApiResult, EndpointClass, EndpointClassifier,
    RefreshCoordinator, ReqwestTransport, RequestInterceptor, Transport,
};

/// Authenticated API client: interceptor, transport and refresh coordination in one pipeline.
#[derive(Clone)]
pub struct ApiClient {
    interceptor: RequestInterceptor,
    transport: Arc<dyn Transport>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Build a client talking to `config.base_url` over HTTP.
    pub fn new(
        config: &ApiConfig,
        store: Arc<dyn CredentialStore>,
        terminator: Arc<dyn SessionTerminator>,
    ) -> ApiResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Self::with_transport(config, store, terminator, transport)
    }

    /// Build a client over a custom transport (useful for testing).
    pub fn with_transport(
        config: &ApiConfig,
        store: Arc<dyn CredentialStore>,
        terminator: Arc<dyn SessionTerminator>,
        transport: Arc<dyn Transport>,
    ) -> ApiResult<Self> {
        let classifier = EndpointClassifier::from_config(config)?;
        let refresh_path = config.refresh_path.clone();
        if classifier.classify(&refresh_path, &Method::POST) != EndpointClass::RefreshEndpoint {
            return Err(ConfigError::RefreshPathMismatch {
                path: refresh_path,
                route: classifier.refresh_route().to_owned(),
            }
            .into());
        }

        let interceptor = RequestInterceptor::new(Arc::new(classifier), store.clone());
        let coordinator = Arc::new(RefreshCoordinator::new(
            store,
            transport.clone(),
            terminator,
            refresh_path,
        ));
        Ok(Self {
            interceptor,
            transport,
            coordinator,
        })
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Send a request, recovering once from an expired access credential.
    ///
    /// Returns the response for 2xx statuses and an error for everything else.
    pub async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let class = self.interceptor.classify(&request);
        let prepared = self.interceptor.prepare(request);
        let response = self.transport.execute(&prepared).await?;
        if response.is_success() {
            return Ok(response);
        }

        if response.status != StatusCode::UNAUTHORIZED
            || !class.is_refreshable()
            || prepared.is_retried()
        {
            return Err(response.into_error());
        }

        let mut replay = prepared;
        replay.mark_retried();
        let access = self
            .coordinator
            .await_fresh_token()
            .await
            .map_err(ApiError::SessionExpired)?;

        debug!(method = %replay.method, path = %replay.path, "replaying after refresh");
        let replay = self.interceptor.prepare_replay(replay, &access);
        let response = self.transport.execute(&replay).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        self.send(request).await?.json()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer_of, RecordingTerminator, ScriptedTransport};
    use crate::api::{RefreshError, TransportError};
    use crate::auth::{CredentialPair, MemoryCredentialStore};
    use futures::future::join_all;
    use httpmock::prelude::*;
    use std::time::Duration;

    const ORDERS: &str = "/api/orders/";
    const REFRESH: &str = "/api/auth/token/refresh/";

    struct Fixture {
        client: ApiClient,
        store: Arc<MemoryCredentialStore>,
        transport: Arc<ScriptedTransport>,
        terminator: Arc<RecordingTerminator>,
    }

    fn fixture(transport: ScriptedTransport) -> Fixture {
        let config = ApiConfig::new("http://localhost:8000").unwrap();
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "expired", "refresh-1",
        )));
        let transport = Arc::new(transport);
        let terminator = Arc::new(RecordingTerminator::default());
        let client = ApiClient::with_transport(
            &config,
            store.clone(),
            terminator.clone(),
            transport.clone(),
        )
        .unwrap();
        Fixture {
            client,
            store,
            transport,
            terminator,
        }
    }

    async fn wait_for_waiters(fx: &Fixture, count: usize) {
        while fx.client.coordinator().waiting() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn valid_credential_needs_no_refresh() {
        let fx = fixture(ScriptedTransport::new().accept("expired"));
        let response = fx.client.send(ApiRequest::get(ORDERS)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(fx.transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_expired_calls_refresh_once_and_replay_each() {
        let transport = ScriptedTransport::new()
            .accept("fresh")
            .gated_refresh(StatusCode::OK, r#"{"access":"fresh"}"#);
        let fx = fixture(transport);

        let paths: Vec<String> = (0..5).map(|id| format!("/api/orders/{id}/")).collect();
        let calls = join_all(
            paths
                .iter()
                .map(|path| fx.client.send(ApiRequest::get(path.as_str()))),
        );
        let release = async {
            wait_for_waiters(&fx, 5).await;
            fx.transport.open_gate();
        };
        let (results, ()) = tokio::join!(calls, release);

        for result in results {
            let body: serde_json::Value = result.unwrap().json().unwrap();
            assert_eq!(body["token"], "fresh");
        }
        assert_eq!(fx.transport.refresh_calls(), 1);
        for path in &paths {
            let sent = fx.transport.requests_to(path);
            assert_eq!(sent.len(), 2, "{path} should be sent once and replayed once");
            assert_eq!(bearer_of(&sent[0]).as_deref(), Some("expired"));
            assert_eq!(bearer_of(&sent[1]).as_deref(), Some("fresh"));
        }
        assert_eq!(fx.store.get().unwrap().unwrap().access, "fresh");
        assert_eq!(fx.terminator.calls(), 0);
    }

    #[tokio::test]
    async fn replayed_unauthorized_is_surfaced_without_second_refresh() {
        let transport = ScriptedTransport::new()
            .accept("fresh")
            .reject_path(ORDERS)
            .refresh(StatusCode::OK, r#"{"access":"fresh"}"#)
            .refresh(StatusCode::OK, r#"{"access":"again"}"#);
        let fx = fixture(transport);

        let err = fx.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(fx.transport.refresh_calls(), 1);
        assert_eq!(fx.transport.requests_to(ORDERS).len(), 2);
        assert_eq!(fx.terminator.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_failure_cascades_to_every_caller() {
        let transport =
            ScriptedTransport::new().gated_refresh(StatusCode::BAD_REQUEST, r#"{"detail":"bad"}"#);
        let fx = fixture(transport);

        let calls = join_all((0..4).map(|_| fx.client.send(ApiRequest::get(ORDERS))));
        let release = async {
            wait_for_waiters(&fx, 4).await;
            fx.transport.open_gate();
        };
        let (results, ()) = tokio::join!(calls, release);

        for result in results {
            match result.unwrap_err() {
                ApiError::SessionExpired(RefreshError::Rejected { status, .. }) => {
                    assert_eq!(status, StatusCode::BAD_REQUEST)
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(fx.transport.refresh_calls(), 1);
        assert!(fx.store.get().unwrap().is_none());
        assert_eq!(fx.terminator.calls(), 1);
        // Nobody was replayed.
        assert_eq!(fx.transport.requests_to(ORDERS).len(), 4);
    }

    #[tokio::test]
    async fn refresh_timeout_is_terminal() {
        let timeout = TransportError::Timeout(Duration::from_secs(10));
        let fx = fixture(ScriptedTransport::new().refresh_failure(timeout.clone()));

        let err = fx.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(fx.terminator.errors(), vec![RefreshError::Transport(timeout)]);
        assert!(fx.store.get().unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_and_refresh_endpoints_are_never_retried() {
        let fx = fixture(ScriptedTransport::new().reject_path("/api/auth/user/"));

        let err = fx
            .client
            .send(ApiRequest::get("/api/auth/user/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));

        let err = fx.client.send(ApiRequest::post(REFRESH)).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        // The only refresh-path request is the explicit one above.
        assert_eq!(fx.transport.refresh_calls(), 1);
        assert_eq!(fx.transport.requests_to("/api/auth/user/").len(), 1);
        assert_eq!(fx.terminator.calls(), 0);
        assert!(fx.store.get().unwrap().is_some());
    }

    #[tokio::test]
    async fn anonymous_calls_never_carry_credentials() {
        let transport = ScriptedTransport::new().public_path("/api/support-requests/");
        let fx = fixture(transport);
        fx.store
            .set(&CredentialPair::new("valid", "refresh-1"))
            .unwrap();

        fx.client
            .send(ApiRequest::post("/api/support-requests/").bearer("valid"))
            .await
            .unwrap();
        let sent = fx.transport.requests_to("/api/support-requests/");
        assert_eq!(sent.len(), 1);
        assert!(bearer_of(&sent[0]).is_none());
    }

    #[tokio::test]
    async fn non_unauthorized_failures_are_surfaced() {
        let transport = ScriptedTransport::new()
            .accept("expired")
            .fixed_status(ORDERS, StatusCode::INTERNAL_SERVER_ERROR);
        let fx = fixture(transport);

        let err = fx.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(fx.transport.refresh_calls(), 0);
        assert_eq!(fx.transport.requests_to(ORDERS).len(), 1);
    }

    #[test]
    fn rejects_refresh_path_outside_refresh_route() {
        let mut config = ApiConfig::new("http://localhost:8000").unwrap();
        config.refresh_path = "/api/token/renew/".into();
        let result = ApiClient::with_transport(
            &config,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(RecordingTerminator::default()),
            Arc::new(ScriptedTransport::new()),
        );
        assert!(matches!(
            result.err(),
            Some(ApiError::Config(ConfigError::RefreshPathMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn refresh_over_http() {
        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(GET)
                .path("/api/pickup-requests/")
                .header("authorization", "Bearer expired");
            then.status(401)
                .json_body_obj(&serde_json::json!({ "detail": "Token is expired" }));
        });
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/api/auth/token/refresh/")
                .json_body_obj(&serde_json::json!({ "refresh": "refresh-1" }));
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access": "fresh" }));
        });
        let fresh = server.mock(|when, then| {
            when.method(GET)
                .path("/api/pickup-requests/")
                .header("authorization", "Bearer fresh");
            then.status(200).json_body_obj(&serde_json::json!([]));
        });

        let config = ApiConfig::new(&server.base_url()).unwrap();
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "expired", "refresh-1",
        )));
        let terminator = Arc::new(RecordingTerminator::default());
        let client = ApiClient::new(&config, store.clone(), terminator.clone()).unwrap();

        let pickups: Vec<serde_json::Value> =
            client.get_json("/api/pickup-requests/").await.unwrap();
        assert!(pickups.is_empty());
        stale.assert();
        refresh.assert();
        fresh.assert();
        assert_eq!(store.get().unwrap().unwrap().access, "fresh");
        assert_eq!(terminator.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_rejected_over_http_ends_session() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/pickup-requests/");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/api/auth/token/refresh/");
            then.status(400)
                .json_body_obj(&serde_json::json!({ "detail": "Token is invalid or expired" }));
        });

        let config = ApiConfig::new(&server.base_url()).unwrap();
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "expired", "refresh-1",
        )));
        let terminator = Arc::new(RecordingTerminator::default());
        let client = ApiClient::new(&config, store.clone(), terminator.clone()).unwrap();

        let err = client
            .get_json::<serde_json::Value>("/api/pickup-requests/")
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
        refresh.assert();
        assert!(store.get().unwrap().is_none());
        assert_eq!(terminator.calls(), 1);
    }
}
