use std::sync::Arc;

use log::{error, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, Proxy, Response};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{
    AuthResponse, CredentialStore, LoginRequest, NoopSessionSink, Session, SessionSink,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pipeline::{
    build_authenticated, build_transport, AuthRecoveryMiddleware, HttpTokenRefresher,
    RefreshCoordinator,
};

/// Entry point for talking to the event service as a signed-in user.
///
/// Every request made through this client carries the current access token.
/// Expired tokens are refreshed transparently and only unrecoverable failures
/// reach the caller.
pub struct EventHubClient {
    config: ClientConfig,
    http: ClientWithMiddleware,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    sink: Arc<dyn SessionSink>,
}

impl EventHubClient {
    /// Builds a client whose session is persisted under `config.data_dir()`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = Arc::new(CredentialStore::open(config.credentials_path())?);
        Self::with_parts(config, store, Arc::new(NoopSessionSink))
    }

    pub fn with_parts(
        config: ClientConfig,
        store: Arc<CredentialStore>,
        sink: Arc<dyn SessionSink>,
    ) -> Result<Self> {
        let client = Self::build_http_client(&config)?;
        let transport = Arc::new(build_transport(
            client.clone(),
            config.max_transient_retries,
        ));

        let refresher = HttpTokenRefresher::new(transport, config.endpoint(&config.refresh_path));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::new(refresher),
            Arc::clone(&sink),
            config.refresh_timeout(),
        );
        let recovery = AuthRecoveryMiddleware::new(
            coordinator.clone(),
            [config.login_path.clone(), config.refresh_path.clone()],
        );
        let http = build_authenticated(
            client,
            Arc::clone(&store),
            recovery,
            config.max_transient_retries,
        );

        Ok(Self {
            config,
            http,
            store,
            coordinator,
            sink,
        })
    }

    fn build_http_client(config: &ClientConfig) -> Result<Client> {
        let mut builder = Client::builder().default_headers(Self::default_headers());
        if !config.http_proxy.is_empty() {
            builder = builder.proxy(Proxy::http(&config.http_proxy)?);
        }
        if !config.https_proxy.is_empty() {
            builder = builder.proxy(Proxy::https(&config.https_proxy)?);
        }
        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> Option<Session> {
        self.store.session()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.store.is_empty()
    }

    /// Signs in and stores the issued credential together with the profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let builder = self
            .request(Method::POST, &self.config.login_path)
            .json(&LoginRequest { email, password });
        let auth: AuthResponse = self.json(builder).await.map_err(|e| {
            error!("Login failed for {}: {}", email, e);
            e
        })?;

        let (credential, session) = auth.into_parts();
        self.store.set(credential, session.clone())?;
        info!("Signed in as {} ({})", session.email, session.org_id);
        Ok(session)
    }

    /// Drops the local session. The server is not contacted.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        self.sink.clear();
        info!("Signed out");
        Ok(())
    }

    /// Starts a request against `path` on the API base, routed through the
    /// authenticated pipeline.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.config.endpoint(path))
    }

    /// Sends a request, turning any non-success status into
    /// [`ClientError::Status`].
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status { status, body })
    }

    pub async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(ClientError::from)
    }

    /// GET with query parameters. Empty values are left out.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let query: Vec<(&str, &str)> = query
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .copied()
            .collect();
        self.json(self.request(Method::GET, path).query(&query)).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.json(self.request(Method::POST, path).json(body)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.json(self.request(Method::PATCH, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}
