mod common;

use std::sync::Arc;

use common::{FailingTokenProvider, TOKEN, client, client_with, secs};
use graphreq::{ApiRequest, GraphError, GraphResponse, HttpMethod, QueryParams};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path, query_param},
};

#[tokio::test]
async fn test_get_sends_bearer_token_and_parses_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"displayName": "Ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let response = client.get("/me", None, None).await.unwrap();

    assert_eq!(response, GraphResponse::Content(json!({"displayName": "Ada"})));
    assert!(sleeper.slept().is_empty());
}

#[tokio::test]
async fn test_search_query_gets_consistency_and_prefer_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/messages"))
        .and(query_param("$search", "\"budget\""))
        .and(query_param("$count", "true"))
        .and(header("consistencylevel", "eventual"))
        .and(header("prefer", "outlook.body-content-type=\"text\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let params: QueryParams = [("$search".to_string(), "\"budget\"".to_string())]
        .into_iter()
        .collect();
    client
        .get("/me/messages", None, Some(params))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_body_is_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/me/messages/m1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let response = client
        .execute(ApiRequest::new(HttpMethod::Delete, "/me/messages/m1"), None)
        .await
        .unwrap();
    assert!(response.is_no_content());
}

#[tokio::test]
async fn test_post_json_sets_content_type() {
    let server = MockServer::start().await;
    let body = json!({"message": {"subject": "Hi"}});
    Mock::given(method("POST"))
        .and(path("/me/sendMail"))
        .and(header("content-type", "application/json"))
        .and(body_json(&body))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let response = client
        .execute(ApiRequest::post_json("/me/sendMail", body.clone()), None)
        .await
        .unwrap();
    assert_eq!(response, GraphResponse::NoContent);
}

#[tokio::test]
async fn test_rate_limit_wait_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "me"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let response = client.get("/me", None, None).await.unwrap();

    assert_eq!(response.into_content().unwrap()["id"], "me");
    assert_eq!(sleeper.slept(), secs(&[60]));
}

#[tokio::test]
async fn test_rate_limit_without_header_waits_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    client.get("/me", None, None).await.unwrap();
    assert_eq!(sleeper.slept(), secs(&[5]));
}

#[tokio::test]
async fn test_server_errors_back_off_then_give_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(4)
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let err = client.get("/me", None, None).await.unwrap_err();

    match err {
        GraphError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, GraphError::ServerError { status: 503, .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(sleeper.slept(), secs(&[1, 2, 4]));
}

#[tokio::test]
async fn test_per_call_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let err = client
        .execute(ApiRequest::get("/flaky").with_max_retries(1), None)
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(sleeper.slept(), secs(&[1]));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/messages/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ErrorItemNotFound", "message": "The specified object was not found."}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let err = client
        .get("/me/messages/missing", None, None)
        .await
        .unwrap_err();

    match err {
        GraphError::ClientError {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 404);
            assert_eq!(code.as_deref(), Some("ErrorItemNotFound"));
            assert_eq!(message, "The specified object was not found.");
        }
        other => panic!("expected ClientError, got {other:?}"),
    }
    assert!(sleeper.slept().is_empty());
}

#[tokio::test]
async fn test_token_failure_sends_nothing() {
    let server = MockServer::start().await;
    let (client, _) = client_with(&server, Arc::new(FailingTokenProvider));

    let err = client.get("/me", Some("alice"), None).await.unwrap_err();

    match err {
        GraphError::Auth { account, source } => {
            assert_eq!(account, "alice");
            assert_eq!(source.to_string(), "account is signed out");
        }
        other => panic!("expected Auth, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retries_reuse_client_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    client.get("/me", None, None).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let ids: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("client-request-id").unwrap().clone())
        .collect();
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test]
async fn test_download_raw_returns_bytes() {
    let server = MockServer::start().await;
    let content = b"%PDF-1.7 not really".to_vec();
    Mock::given(method("GET"))
        .and(path("/me/drive/items/f1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let bytes = client
        .download_raw("/me/drive/items/f1/content", None, None)
        .await
        .unwrap();
    assert_eq!(bytes, content);
}
