use http::Extensions;
use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::{Request, Response};
use reqwest_middleware::{Next, Result};

use super::interceptor::bearer_value;
use crate::auth::Credential;

/// Marks a request as a replay after a credential refresh. A replay that is
/// rejected again goes straight back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRetried;

/// Re-issues a rejected request with a fresh credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryDispatcher;

impl RetryDispatcher {
    /// `request` must be an untouched clone of the original (method, URL with
    /// query, headers, body). The original extensions are copied, not mutated.
    pub async fn replay(
        &self,
        mut request: Request,
        credential: &Credential,
        extensions: &Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        request
            .headers_mut()
            .insert(AUTHORIZATION, bearer_value(&credential.access_token)?);

        let mut replay_extensions = extensions.clone();
        replay_extensions.insert(AlreadyRetried);

        debug!(
            "Replaying {} {} with refreshed credential",
            request.method(),
            request.url().path()
        );
        next.run(request, &mut replay_extensions).await
    }
}
