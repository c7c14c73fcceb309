//! Authenticated request pipeline.
//!
//! Middleware order, outermost first:
//! 1. `AuthRecoveryMiddleware` - turns a 401 into one coordinated refresh plus a replay
//! 2. `BearerAuthInterceptor` - attaches the current access token
//! 3. `RetryTransientMiddleware` - retries 5xx and connection faults
//!
//! The refresh call itself goes through a client that only has step 3, so it
//! can never recurse into the recovery logic.

pub mod coordinator;
pub mod dispatcher;
pub mod interceptor;
pub mod recovery;

use std::sync::Arc;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::auth::CredentialStore;

pub use coordinator::{HttpTokenRefresher, RefreshCoordinator, TokenRefresher};
pub use dispatcher::{AlreadyRetried, RetryDispatcher};
pub use interceptor::{AttachedCredential, BearerAuthInterceptor};
pub use recovery::AuthRecoveryMiddleware;

// Exponential backoff with jitter, starting at 1s
fn transient_retries(max_retries: u32) -> RetryTransientMiddleware<ExponentialBackoff> {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
    RetryTransientMiddleware::new_with_policy(retry_policy)
}

/// Plain client with transient retries only.
pub fn build_transport(client: Client, max_retries: u32) -> ClientWithMiddleware {
    ClientBuilder::new(client)
        .with(transient_retries(max_retries))
        .build()
}

/// Full pipeline used for every call made on behalf of the user.
pub fn build_authenticated(
    client: Client,
    store: Arc<CredentialStore>,
    recovery: AuthRecoveryMiddleware,
    max_retries: u32,
) -> ClientWithMiddleware {
    ClientBuilder::new(client)
        .with(recovery)
        .with(BearerAuthInterceptor::new(store))
        .with(transient_retries(max_retries))
        .build()
}
