//! Integration tests for the authenticated request pipeline


use std::sync::Arc;
use std::time::Duration;

use eventhub_client::{ClientError, Credential, CredentialStore, RefreshError, Session};
use futures::future::join_all;
use reqwest::StatusCode;
use test_utils::*;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn admin_session() -> Session {
    Session {
        email: ADMIN_EMAIL.to_string(),
        org_id: "org-a".to_string(),
        roles: ["Admin".to_string()].into_iter().collect(),
    }
}

fn signed_in_store(access_token: &str, refresh_token: &str) -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::in_memory());
    store
        .set(Credential::new(access_token, refresh_token), admin_session())
        .expect("set");
    store
}

async fn mount_refresh(server: &MockServer, template: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(serde_json::json!({ "refreshToken": "r1" })))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

/// Login, then five simultaneous calls that all hit an expired token.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_five_concurrent_rejections_share_one_refresh() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;

    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer a2"))
        .and(query_param("scope", "mine"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockResponseBuilder::event_page()))
        .expect(5)
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(MockResponseBuilder::refreshed("a2"))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let (client, sink) = in_memory_client(&mock_server);
    let session = client
        .login(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .expect("login");
    assert!(session.has_role("Admin"));
    assert_eq!(client.store().get(), Some(Credential::new("a1", "r1")));

    let calls = (0..5).map(|_| {
        client.get_json::<serde_json::Value>("/api/events", &[("scope", "mine"), ("cursor", "")])
    });
    let results = join_all(calls).await;

    for result in results {
        let page = result.expect("replayed after refresh");
        assert_eq!(page["items"][0]["title"], "Quarterly review");
    }
    assert_eq!(client.store().get(), Some(Credential::new("a2", "r1")));
    assert_eq!(client.coordinator().refresh_count(), 1);
    assert_eq!(sink.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_failure_rejects_every_waiter_and_signs_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(401)
            .set_body_string("refresh token revoked")
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(dir.path());
    store
        .set(Credential::new("a1", "r1"), admin_session())
        .expect("set");
    let (client, sink) = client_with_store(test_config(&mock_server), store);

    let calls = (0..3).map(|_| client.get_json::<serde_json::Value>("/api/events", &[]));
    let results = join_all(calls).await;

    for result in results {
        match result {
            Err(ClientError::Refresh(RefreshError::Rejected { status, body })) => {
                assert_eq!(status, 401);
                assert_eq!(body, "refresh token revoked");
            }
            other => panic!("expected refresh failure, got {other:?}"),
        }
    }
    assert!(client.store().get().is_none());
    assert!(!client.is_authenticated());
    assert!(!dir.path().join("session.json").exists());
    assert_eq!(sink.get(), 1);
}

#[tokio::test]
async fn test_second_rejection_is_surfaced_without_another_refresh() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/audit"))
        .respond_with(ResponseTemplate::new(401).set_body_string("still not allowed"))
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(MockResponseBuilder::refreshed("a2")),
        1,
    )
    .await;

    let (client, sink) = client_with_store(test_config(&mock_server), signed_in_store("a1", "r1"));

    let err = client
        .get_json::<serde_json::Value>("/api/admin/audit", &[])
        .await
        .expect_err("second 401 is final");

    assert!(err.is_unauthorized());
    assert!(!err.is_refresh_failure());
    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, "still not allowed");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(client.store().access_token().as_deref(), Some("a2"));
    assert_eq!(sink.get(), 0);
}

#[tokio::test]
async fn test_rejected_login_never_triggers_refresh() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    // A stale session is present, so a refresh would be possible in principle.
    let (client, _sink) =
        client_with_store(test_config(&mock_server), signed_in_store("old", "r1"));

    let err = client
        .login(ADMIN_EMAIL, "wrong password")
        .await
        .expect_err("bad password");

    assert!(err.is_unauthorized());
    assert_eq!(client.store().access_token().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_missing_refresh_token_surfaces_original_rejection() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    let (client, sink) = in_memory_client(&mock_server);

    let err = client
        .get_json::<serde_json::Value>("/api/events", &[])
        .await
        .expect_err("no credential");

    assert!(err.is_unauthorized());
    assert!(!client.coordinator().is_refreshing());
    assert_eq!(sink.get(), 0);
}

#[tokio::test]
async fn test_replay_preserves_method_and_body() {
    let mock_server = MockServer::start().await;
    let payload = serde_json::json!({
        "title": "Launch party",
        "category": "Social",
        "startDate": "2026-11-01",
        "endDate": "2026-11-02"
    });

    Mock::given(method("POST"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer a2"))
        .and(body_json(payload.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 42 })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(MockResponseBuilder::refreshed("a2")),
        1,
    )
    .await;

    let (client, _sink) = client_with_store(test_config(&mock_server), signed_in_store("a1", "r1"));

    let created: serde_json::Value = client
        .post_json("/api/events", &payload)
        .await
        .expect("created after refresh");
    assert_eq!(created["id"], 42);
}

#[tokio::test]
async fn test_rotated_refresh_token_is_persisted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/events/7"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/events/7"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({ "accessToken": "a2", "refreshToken": "r2" })),
        1,
    )
    .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(dir.path());
    store
        .set(Credential::new("a1", "r1"), admin_session())
        .expect("set");
    let (client, _sink) = client_with_store(test_config(&mock_server), store);

    client.delete("/api/events/7").await.expect("deleted");

    let reopened = file_store(dir.path());
    assert_eq!(reopened.get(), Some(Credential::new("a2", "r2")));
    assert_eq!(reopened.session(), Some(admin_session()));
}

#[tokio::test]
async fn test_refresh_timeout_signs_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(MockResponseBuilder::refreshed("a2"))
            .set_delay(Duration::from_secs(3)),
        1,
    )
    .await;

    let mut config = test_config(&mock_server);
    config.refresh_timeout_secs = 1;
    let (client, sink) = client_with_store(config, signed_in_store("a1", "r1"));

    let err = client
        .get_json::<serde_json::Value>("/api/events", &[])
        .await
        .expect_err("refresh timed out");

    assert!(matches!(
        err,
        ClientError::Refresh(RefreshError::Timeout(timeout)) if timeout == Duration::from_secs(1)
    ));
    assert!(!client.is_authenticated());
    assert_eq!(sink.get(), 1);
}

#[tokio::test]
async fn test_non_auth_failures_pass_through_untouched() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/events/bulk"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    let (client, _sink) = client_with_store(test_config(&mock_server), signed_in_store("a1", "r1"));

    let err = client
        .patch_json::<_, serde_json::Value>(
            "/api/events/bulk",
            &serde_json::json!({ "action": "approve", "ids": [1, 2] }),
        )
        .await
        .expect_err("forbidden");

    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert_eq!(client.store().access_token().as_deref(), Some("a1"));
}

#[tokio::test]
async fn test_caller_supplied_authorization_is_never_replaced() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer pinned"))
        .respond_with(ResponseTemplate::new(401).set_body_string("pinned token expired"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockResponseBuilder::event_page()))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    // The stored token has already moved on from the one the caller pinned.
    let store = signed_in_store("a1", "r1");
    store.rotate("a2".to_string(), None).expect("rotate");
    let (client, sink) = client_with_store(test_config(&mock_server), store);

    let err = client
        .send(
            client
                .request(reqwest::Method::GET, "/api/events")
                .header("authorization", "Bearer pinned"),
        )
        .await
        .expect_err("pinned credential rejected");

    assert!(err.is_unauthorized());
    assert_eq!(client.coordinator().refresh_count(), 0);
    assert_eq!(client.store().access_token().as_deref(), Some("a2"));
    assert_eq!(sink.get(), 0);
}
