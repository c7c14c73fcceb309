use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use http::Extensions;
use log::trace;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

use crate::auth::CredentialStore;

/// Access token the interceptor put on the request, so the response side can
/// tell whether the token it got rejected with is still the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedCredential(pub String);

pub(crate) fn bearer_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| {
        reqwest_middleware::Error::Middleware(anyhow!("access token is not a valid header: {err}"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Adds `Authorization: Bearer <access token>` to outgoing requests.
///
/// Requests that already carry an `Authorization` header keep it.
#[derive(Debug, Clone)]
pub struct BearerAuthInterceptor {
    store: Arc<CredentialStore>,
}

impl BearerAuthInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Middleware for BearerAuthInterceptor {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !req.headers().contains_key(AUTHORIZATION) {
            match self.store.access_token() {
                Some(token) => {
                    req.headers_mut().insert(AUTHORIZATION, bearer_value(&token)?);
                    extensions.insert(AttachedCredential(token));
                }
                None => trace!(
                    "No credential stored, sending {} unauthenticated",
                    req.url().path()
                ),
            }
        }
        next.run(req, extensions).await
    }
}
