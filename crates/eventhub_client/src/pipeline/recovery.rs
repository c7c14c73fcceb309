use async_trait::async_trait;
use http::Extensions;
use log::warn;
use reqwest::header::AUTHORIZATION;
use reqwest::{Request, Response, StatusCode, Url};
use reqwest_middleware::{Middleware, Next, Result};

use super::coordinator::RefreshCoordinator;
use super::dispatcher::{AlreadyRetried, RetryDispatcher};
use super::interceptor::AttachedCredential;
use crate::error::RefreshError;

/// Response side of the pipeline.
///
/// A 401 from a protected endpoint on a first attempt, sent with the stored
/// credential, is handed to the [`RefreshCoordinator`]. Once a credential
/// comes back, the request is replayed once through the rest of the chain.
pub struct AuthRecoveryMiddleware {
    coordinator: RefreshCoordinator,
    dispatcher: RetryDispatcher,
    auth_paths: Vec<String>,
}

impl AuthRecoveryMiddleware {
    /// `auth_paths` are the login/refresh routes. Their rejections are final.
    pub fn new<I, S>(coordinator: RefreshCoordinator, auth_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            coordinator,
            dispatcher: RetryDispatcher,
            auth_paths: auth_paths.into_iter().map(Into::into).collect(),
        }
    }

    fn is_auth_endpoint(&self, url: &Url) -> bool {
        let path = url.path();
        self.auth_paths.iter().any(|auth| path.contains(auth.as_str()))
    }
}

#[async_trait]
impl Middleware for AuthRecoveryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        // A caller-pinned Authorization header is never swapped for the stored token.
        if extensions.get::<AlreadyRetried>().is_some()
            || self.is_auth_endpoint(req.url())
            || req.headers().contains_key(AUTHORIZATION)
        {
            return next.run(req, extensions).await;
        }

        let replayable = req.try_clone();
        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(replayable) = replayable else {
            warn!(
                "{} was rejected but its body cannot be replayed",
                response.url().path()
            );
            return Ok(response);
        };

        let stale = extensions
            .get::<AttachedCredential>()
            .map(|attached| attached.0.clone());
        match self.coordinator.recover(stale.as_deref()).await {
            Ok(credential) => {
                self.dispatcher
                    .replay(replayable, &credential, extensions, next)
                    .await
            }
            Err(RefreshError::MissingRefreshToken) => Ok(response),
            Err(err) => Err(reqwest_middleware::Error::Middleware(anyhow::Error::new(err))),
        }
    }
}
