use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Access and refresh token pair. Both halves are always present together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***")
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .finish()
    }
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: String,
    pub org_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Session {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body returned by `/auth/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub email: String,
    pub org_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthResponse {
    pub fn into_parts(self) -> (Credential, Session) {
        let credential = Credential::new(self.access_token, self.refresh_token);
        let session = Session {
            email: self.email,
            org_id: self.org_id,
            roles: self.roles.into_iter().collect(),
        };
        (credential, session)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body returned by `/auth/refresh`. The refresh token is only rotated when
/// the server sends a new one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_splits_into_credential_and_session() {
        let response: AuthResponse = serde_json::from_value(serde_json::json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1",
            "email": "admin@orga.com",
            "orgId": "org-a",
            "roles": ["Admin", "Admin", "Viewer"]
        }))
        .expect("parse auth response");

        let (credential, session) = response.into_parts();
        assert_eq!(credential, Credential::new("access-1", "refresh-1"));
        assert_eq!(session.org_id, "org-a");
        assert_eq!(session.roles.len(), 2);
        assert!(session.has_role("Admin"));
        assert!(!session.has_role("admin"));
    }

    #[test]
    fn refresh_response_refresh_token_is_optional() {
        let plain: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a2"}"#).expect("parse");
        assert_eq!(plain, RefreshResponse::new("a2"));

        let rotated: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a2","refreshToken":"r2"}"#).expect("parse");
        assert_eq!(rotated.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn credential_debug_masks_tokens() {
        let credential = Credential::new("secret-access-token", "secret-refresh-token");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("secr***"));
    }

    #[test]
    fn refresh_request_uses_camel_case() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "r1",
        })
        .expect("serialize");
        assert_eq!(body, serde_json::json!({ "refreshToken": "r1" }));
    }
}
