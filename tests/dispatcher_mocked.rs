/// Refresh-and-retry behaviour of the request dispatcher
/// Every test runs the full ApiClient -> service -> dispatcher path against mocks
use amocrm_api_client::config::Config;
use amocrm_api_client::services::{EntityService, ListParams};
use amocrm_api_client::{ApiClient, ApiError, TokenState};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn create_test_client(server: &MockServer) -> ApiClient {
    let config = Config::new("client-id", "client-secret", "https://example.com/callback")
        .with_base_url_override(server.uri());
    let mut client = ApiClient::from_config(&config).unwrap();
    client.set_account_base_domain("example").unwrap();
    client
}

fn expired_token() -> TokenState {
    TokenState::new(
        "old-access",
        "old-refresh",
        Utc::now() - Duration::hours(1),
        "Bearer",
    )
}

fn valid_token() -> TokenState {
    TokenState::new(
        "old-access",
        "old-refresh",
        Utc::now() + Duration::hours(1),
        "Bearer",
    )
}

fn token_body() -> serde_json::Value {
    serde_json::json!({
        "token_type": "Bearer",
        "expires_in": 86400,
        "access_token": "new-access",
        "refresh_token": "new-refresh"
    })
}

fn leads_body() -> serde_json::Value {
    serde_json::json!({
        "_page": 1,
        "_embedded": {"leads": [{"id": 3912171, "name": "Deal #1"}]}
    })
}

async fn mount_token_endpoint(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Rejects the pre-rotation token with 401, serves leads for any other token,
/// and counts every resource request it sees.
struct RotatingLeads {
    hits: Arc<AtomicUsize>,
}

impl Respond for RotatingLeads {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let authorization = request
            .headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if authorization == "Bearer old-access" {
            ResponseTemplate::new(401)
        } else {
            ResponseTemplate::new(200).set_body_json(leads_body())
        }
    }
}

fn recording_callback(client: &mut ApiClient) -> Arc<Mutex<Vec<TokenState>>> {
    let seen: Arc<Mutex<Vec<TokenState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on_access_token_refresh(move |token| {
        sink.lock().unwrap().push(token.clone());
    });
    seen
}

#[tokio::test]
async fn test_expired_token_refreshes_before_first_request() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(expired_token());
    let seen = recording_callback(&mut client);

    let body = client.leads().unwrap().get(&ListParams::new()).await.unwrap();

    assert_eq!(body, leads_body());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].access_token, "new-access");
    assert_eq!(
        *client.oauth_client().access_token().unwrap(),
        seen[0]
    );
}

#[tokio::test]
async fn test_unauthorized_response_refreshes_and_retries_once() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .and(header("Authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "title": "Unauthorized",
            "status": 401
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());
    let seen = recording_callback(&mut client);

    let body = client.leads().unwrap().get(&ListParams::new()).await.unwrap();

    assert_eq!(body, leads_body());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_double_unauthorized_is_terminal() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());

    let err = client
        .leads()
        .unwrap()
        .get(&ListParams::new())
        .await
        .unwrap_err();

    assert!(err.is_auth_failure());
    assert!(matches!(err.root(), ApiError::AuthExchange(_)));
}

#[tokio::test]
async fn test_unauthorized_after_proactive_refresh_is_not_retried() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/contacts"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(expired_token());

    let err = client
        .contacts()
        .unwrap()
        .get(&ListParams::new())
        .await
        .unwrap_err();

    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_rejected_refresh_token_issues_no_resource_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "hint": "Token has been revoked",
            "status": 400
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(expired_token());
    let seen = recording_callback(&mut client);

    let err = client
        .leads()
        .unwrap()
        .get(&ListParams::new())
        .await
        .unwrap_err();

    assert!(err.is_auth_failure());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_api_errors_are_not_retried() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 0).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "title": "Too Many Requests",
            "status": 429
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v4/contacts"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());

    let err = client
        .leads()
        .unwrap()
        .get(&ListParams::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert!(!err.is_retryable());
    match err.root() {
        ApiError::ApiRequest { payload, .. } => assert_eq!(payload["title"], "Too Many Requests"),
        other => panic!("Expected ApiRequest, got {:?}", other),
    }

    let err = client
        .contacts()
        .unwrap()
        .add(&serde_json::json!({"name": "John"}))
        .await
        .unwrap_err();
    match err.root() {
        ApiError::ApiRequest { status, payload } => {
            assert_eq!(*status, 502);
            assert_eq!(payload, &serde_json::json!("Bad Gateway"));
        }
        other => panic!("Expected ApiRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_is_network_error_without_refresh() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 0).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(leads_body())
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());

    let err = client
        .leads()
        .unwrap()
        .with_timeout(std::time::Duration::from_millis(50))
        .get(&ListParams::new())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err.root(), ApiError::Network(_)));
}

#[tokio::test]
async fn test_concurrent_expired_calls_share_one_refresh() {
    let mock_server = MockServer::start().await;

    // Slow token endpoint so every caller detects expiry before the rotation lands
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body())
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(10)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(expired_token());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client.on_access_token_refresh(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut handles = vec![];
    for _ in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.leads()?.get(&ListParams::new()).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        client.oauth_client().access_token().unwrap().access_token,
        "new-access"
    );
}

#[tokio::test]
async fn test_rotation_is_visible_to_existing_services() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/contacts"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"_embedded": {"contacts": []}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(expired_token());

    // Both services exist before the rotation happens
    let leads = client.leads().unwrap();
    let contacts = client.contacts().unwrap();

    leads.get(&ListParams::new()).await.unwrap();
    contacts.get(&ListParams::new()).await.unwrap();
}

#[tokio::test]
async fn test_missing_access_token_fails_at_request_time() {
    let mock_server = MockServer::start().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.on_access_token_refresh(|_| {});

    // Factory succeeds; the missing token only surfaces on the first request
    let leads = client.leads().unwrap();
    let err = leads.get(&ListParams::new()).await.unwrap_err();

    assert!(matches!(err.root(), ApiError::MissingConfiguration(_)));
}

#[tokio::test]
async fn test_callback_runs_after_swap_and_before_retry() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 1).await;

    let hits = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(RotatingLeads { hits: hits.clone() })
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());

    // (token passed to the callback, token current at that time, requests sent so far)
    let observed: Arc<Mutex<Vec<(TokenState, Option<TokenState>, usize)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let session_view = client.clone();
    let hits_view = hits.clone();
    client.on_access_token_refresh(move |token| {
        let current = session_view
            .oauth_client()
            .access_token()
            .map(|current| (*current).clone());
        sink.lock()
            .unwrap()
            .push((token.clone(), current, hits_view.load(Ordering::SeqCst)));
    });

    client.leads().unwrap().get(&ListParams::new()).await.unwrap();

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    let (notified, current, sent_before) = &observed[0];
    assert_eq!(notified.access_token, "new-access");
    assert_eq!(current.as_ref(), Some(notified));
    // Only the rejected first attempt had gone out
    assert_eq!(*sent_before, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_unauthorized_calls_share_one_refresh() {
    let mock_server = MockServer::start().await;

    // Slow token endpoint so the other callers hit 401 while the rotation is in flight
    Mock::given(method("POST"))
        .and(path("/oauth2/access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body())
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let hits = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/api/v4/leads"))
        .respond_with(RotatingLeads { hits: hits.clone() })
        .mount(&mock_server)
        .await;

    let mut client = create_test_client(&mock_server);
    client.set_access_token(valid_token());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client.on_access_token_refresh(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut handles = vec![];
    for _ in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.leads()?.get(&ListParams::new()).await
        }));
    }

    for handle in handles {
        let body = handle.await.unwrap().unwrap();
        assert_eq!(body, leads_body());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Each caller sends at most one rejected attempt and one retry
    let sent = hits.load(Ordering::SeqCst);
    assert!((11..=20).contains(&sent), "unexpected request count {}", sent);
    assert_eq!(
        client.oauth_client().access_token().unwrap().access_token,
        "new-access"
    );
}
