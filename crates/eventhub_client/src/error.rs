use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

/// Outcome of a failed credential refresh.
///
/// One refresh settles every request queued behind it, so the error has to be
/// cheap to clone and carries only owned strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("session ended while the refresh was in flight")]
    SessionEnded,

    #[error("failed to persist refreshed credentials: {0}")]
    Storage(String),

    #[error("refresh task ended without a result")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("middleware error: {0}")]
    Middleware(anyhow::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credential storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, ClientError::Refresh(_))
    }
}

impl From<reqwest_middleware::Error> for ClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => ClientError::Http(err),
            reqwest_middleware::Error::Middleware(err) => match err.downcast::<RefreshError>() {
                Ok(refresh) => ClientError::Refresh(refresh),
                Err(other) => ClientError::Middleware(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
