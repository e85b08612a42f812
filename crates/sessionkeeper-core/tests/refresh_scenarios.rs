mod common;

use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use sessionkeeper_core::{ApiError, OutgoingRequest, RefreshError, SessionState};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

const PROTECTED: [&str; 5] = ["/students", "/courses", "/attendance", "/fees", "/exams"];

/// Protected endpoints accept only the fresh token; everything else is a 401.
async fn mount_protected(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/(students|courses|attendance|fees|exams)$"))
        .and(header("authorization", format!("Bearer {}", FRESH_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/(students|courses|attendance|fees|exams)$"))
        .respond_with(unauthorized())
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn parallel_401s_share_one_refresh_and_all_retry_with_new_token() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/dashboard");
    let client = logged_in(&server, navigator.clone()).await;
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": FRESH_TOKEN }))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let results = join_all(PROTECTED.iter().map(|p| client.get_json::<Value>(p))).await;

    for result in results {
        assert_eq!(result.expect("retried request should succeed"), json!({ "items": [] }));
    }
    for target in PROTECTED {
        assert_eq!(requests_with_token(&server, target, EXPIRED_TOKEN).await, 1);
        assert_eq!(requests_with_token(&server, target, FRESH_TOKEN).await, 1);
    }
    assert_eq!(client.tokens().get().unwrap().as_str(), FRESH_TOKEN);
    assert_eq!(navigator.redirects(), 0);

    wait_for_state(&client, SessionState::Authenticated).await;
    server.verify().await;
}

#[tokio::test]
async fn failed_refresh_rejects_everyone_and_logs_out_once() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/dashboard");
    let client = logged_in(&server, navigator.clone()).await;
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(unauthorized().set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;

    let results = join_all(PROTECTED.iter().map(|p| client.get_json::<Value>(p))).await;

    for result in results {
        match result {
            Err(ApiError::RefreshFailed(RefreshError::Rejected(401))) => {}
            other => panic!("expected refresh failure, got {:?}", other),
        }
    }
    assert!(client.tokens().get().is_none());

    wait_for_state(&client, SessionState::Anonymous).await;
    // Give any duplicate notification a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(navigator.redirects(), 1);
    assert_eq!(navigator.location(), "/login");
    assert!(client.session().current_user().is_none());

    server.verify().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_threaded_burst_still_refreshes_once() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/dashboard");
    let client = std::sync::Arc::new(logged_in(&server, navigator).await);
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": FRESH_TOKEN }))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move { client.get_json::<Value>(PROTECTED[i % PROTECTED.len()]).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().expect("request should succeed after refresh");
    }
    server.verify().await;
}

#[tokio::test]
async fn second_401_after_retry_is_final() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/reports");
    let client = logged_in(&server, navigator.clone()).await;

    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.dispatch(OutgoingRequest::get("/reports")).await.unwrap_err();
    assert!(matches!(err, ApiError::RetryExhausted), "got {:?}", err);
    assert_eq!(requests_to(&server, "/reports").await, 2);

    // Retry exhaustion is the caller's problem, not a session failure
    assert_eq!(navigator.redirects(), 0);
    assert_eq!(client.tokens().get().unwrap().as_str(), FRESH_TOKEN);
    server.verify().await;
}

#[tokio::test]
async fn already_retried_request_never_contacts_refresh() {
    let server = MockServer::start().await;
    let client = logged_in(&server, RecordingNavigator::at("/reports")).await;

    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .expect(0)
        .mount(&server)
        .await;

    let mut request = OutgoingRequest::get("/reports");
    request.mark_retry_attempted();
    let err = client.dispatch(request).await.unwrap_err();
    assert!(matches!(err, ApiError::RetryExhausted), "got {:?}", err);
    server.verify().await;
}

#[tokio::test]
async fn auth_endpoints_never_enter_recovery() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/login");
    let client = client(&server, navigator.clone());

    Mock::given(method("POST"))
        .and(path_regex(r"^/auth/(login|register)$"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(unauthorized())
        .expect(0)
        .mount(&server)
        .await;

    let err = client.login("registrar@school.test", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized), "got {:?}", err);
    assert_eq!(client.state(), SessionState::Anonymous);

    for target in ["/auth/login", "/auth/register"] {
        let request = OutgoingRequest::post(target)
            .json(&json!({ "email": "x@school.test", "password": "nope" }))
            .unwrap();
        let err = client.dispatch(request).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized), "got {:?}", err);
    }

    assert_eq!(navigator.redirects(), 0);
    server.verify().await;
}

#[tokio::test]
async fn refresh_endpoint_401_through_dispatcher_does_not_recurse() {
    let server = MockServer::start().await;
    let client = client(&server, RecordingNavigator::at("/login"));

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;

    let err = client.dispatch(OutgoingRequest::post("/auth/refresh")).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized), "got {:?}", err);
    server.verify().await;
}

#[tokio::test]
async fn non_auth_errors_pass_through_untouched() {
    let server = MockServer::start().await;
    let client = logged_in(&server, RecordingNavigator::at("/fees")).await;

    Mock::given(method("GET"))
        .and(path("/fees"))
        .respond_with(ResponseTemplate::new(403).set_body_string("fees are admin only"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .expect(0)
        .mount(&server)
        .await;

    let response = client.dispatch(OutgoingRequest::get("/fees")).await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    match client.get_json::<Value>("/fees").await {
        Err(ApiError::AccessDenied(body)) => assert_eq!(body, "fees are admin only"),
        other => panic!("expected access denied, got {:?}", other),
    }
    server.verify().await;
}

#[tokio::test]
async fn missing_token_recovers_through_refresh_cookie() {
    let server = MockServer::start().await;
    let client = client(&server, RecordingNavigator::at("/students"));
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .expect(1)
        .mount(&server)
        .await;

    let body: Value = client.get_json("/students").await.unwrap();
    assert_eq!(body, json!({ "items": [] }));
    server.verify().await;
}

#[tokio::test]
async fn refresh_carries_transport_credential() {
    let server = MockServer::start().await;
    let client = logged_in(&server, RecordingNavigator::at("/students")).await;
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("cookie", "refresh=rt-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .expect(1)
        .mount(&server)
        .await;

    client.get_json::<Value>("/students").await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn transient_refresh_failure_is_retried_before_logout() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/courses");
    let client = logged_in(&server, navigator.clone()).await;
    mount_protected(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream restarting"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": FRESH_TOKEN })))
        .mount(&server)
        .await;

    client.get_json::<Value>("/courses").await.unwrap();
    assert_eq!(requests_to(&server, "/auth/refresh").await, 2);
    assert_eq!(navigator.redirects(), 0);
}

#[tokio::test]
async fn timed_out_refresh_counts_as_failure() {
    let server = MockServer::start().await;
    mount_login(&server, EXPIRED_TOKEN).await;
    mount_protected(&server).await;

    let mut config = test_config(&server);
    config.refresh_timeout_secs = 1;
    config.refresh_retries = 0;
    let navigator = RecordingNavigator::at("/attendance");
    let client = sessionkeeper_core::SessionClient::new(config, navigator.clone()).unwrap();
    client.login("registrar@school.test", "correct horse").await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": FRESH_TOKEN }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let results = join_all((0..3).map(|_| client.get_json::<Value>("/attendance"))).await;
    for result in results {
        assert!(
            matches!(result, Err(ApiError::RefreshFailed(RefreshError::Timeout))),
            "got {:?}",
            result
        );
    }

    wait_for_state(&client, SessionState::Anonymous).await;
    assert_eq!(navigator.redirects(), 1);
    assert!(client.tokens().get().is_none());
}

#[tokio::test]
async fn slow_401_after_failed_refresh_does_not_refresh_again() {
    let server = MockServer::start().await;
    let navigator = RecordingNavigator::at("/dashboard");
    let client = logged_in(&server, navigator.clone()).await;

    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(unauthorized().set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;

    let (fast, slow) = tokio::join!(
        client.get_json::<Value>("/fast"),
        client.get_json::<Value>("/slow")
    );

    for result in [fast, slow] {
        assert!(
            matches!(result, Err(ApiError::RefreshFailed(RefreshError::Rejected(401)))),
            "got {:?}",
            result
        );
    }
    wait_for_state(&client, SessionState::Anonymous).await;
    assert_eq!(navigator.redirects(), 1);
    assert_eq!(requests_to(&server, "/auth/refresh").await, 1);
    server.verify().await;
}
