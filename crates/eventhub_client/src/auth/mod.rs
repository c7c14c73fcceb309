//! Credentials and session state.
//!
//! Login flow:
//! 1. POST email/password to `/auth/login`
//! 2. Persist access token, refresh token and user profile together
//! 3. Attach the access token to every protected request
//! 4. Rotate the access token through `/auth/refresh` when it is rejected

pub mod models;
pub mod sink;
pub mod store;

pub use models::{AuthResponse, Credential, LoginRequest, RefreshRequest, RefreshResponse, Session};
pub use sink::{NoopSessionSink, SessionSink};
pub use store::{CredentialStore, StoreError};
