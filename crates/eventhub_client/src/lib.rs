pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;

pub use auth::{
    AuthResponse, Credential, CredentialStore, NoopSessionSink, Session, SessionSink, StoreError,
};
pub use client::EventHubClient;
pub use config::ClientConfig;
pub use error::{ClientError, RefreshError, Result};
pub use pipeline::{
    AlreadyRetried, AuthRecoveryMiddleware, BearerAuthInterceptor, HttpTokenRefresher,
    RefreshCoordinator, RetryDispatcher, TokenRefresher,
};
