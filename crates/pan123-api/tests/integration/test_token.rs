//! Token lifecycle tests

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pan123_api::client::{endpoints, ApiClient};
use pan123_api::types::FileListData;
use pan123_core::config::PersistedToken;
use pan123_core::ports::token_store::{MemoryTokenStore, TokenStore};
use pan123_core::BackendError;

use crate::common::{client_for, err_body, mount_token, ok_body, seeded_config, test_config};

#[tokio::test]
async fn test_token_obtained_and_persisted() {
    let server = MockServer::start().await;
    mount_token(&server, "fresh-token").await;

    let store = Arc::new(MemoryTokenStore::default());
    let config = test_config();
    let client = ApiClient::with_base_urls(&config, store.clone(), &server.uri(), None).unwrap();

    let bearer = client.tokens().ensure_valid(false, false).await.unwrap();
    assert_eq!(bearer, "fresh-token");

    // Persisted through the store callback
    let persisted = store.load().await.unwrap().unwrap();
    assert_eq!(persisted.access_token, "fresh-token");
    assert!(persisted.expiry > Utc::now());

    // A second call answers from cache; the endpoint saw one request
    let again = client.tokens().ensure_valid(false, false).await.unwrap();
    assert_eq!(again, "fresh-token");
    let hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/access_token")
        .count();
    assert_eq!(hits, 1);
}

#[tokio::test]
async fn test_token_refreshed_inside_expiry_margin() {
    let server = MockServer::start().await;
    mount_token(&server, "renewed").await;

    // Seeded token expires in five minutes: inside the ten-minute margin
    let mut config = test_config();
    config.token = Some(PersistedToken {
        access_token: "stale".into(),
        expiry: Utc::now() + ChronoDuration::minutes(5),
    });
    let client = client_for(&server, &config);

    let bearer = client.tokens().ensure_valid(false, false).await.unwrap();
    assert_eq!(bearer, "renewed");
}

#[tokio::test]
async fn test_token_endpoint_auth_failure_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(err_body(400, "client secret invalid")),
        )
        .mount(&server)
        .await;

    let config = test_config();
    let client = client_for(&server, &config);
    let err = client.tokens().ensure_valid(false, false).await.unwrap_err();
    assert!(matches!(err, BackendError::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn test_401_triggers_refresh_and_retry() {
    let server = MockServer::start().await;

    // The stale bearer gets a 401 exactly once
    Mock::given(method("GET"))
        .and(path(endpoints::FILE_LIST))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    // The refreshed bearer succeeds
    Mock::given(method("GET"))
        .and(path(endpoints::FILE_LIST))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1,
            "fileList": [],
        }))))
        .mount(&server)
        .await;
    mount_token(&server, "fresh").await;

    let config = seeded_config("stale");
    let client = client_for(&server, &config);

    let page: FileListData = client
        .get_json(
            endpoints::FILE_LIST,
            &[("parentFileId", "0".to_string()), ("limit", "100".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(page.last_file_id, -1);

    // The token endpoint was consulted exactly once for the recovery
    let token_hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/access_token")
        .count();
    assert_eq!(token_hits, 1);
}

#[tokio::test]
async fn test_second_401_is_terminal() {
    let server = MockServer::start().await;
    // Every bearer is rejected
    Mock::given(method("GET"))
        .and(path(endpoints::FILE_LIST))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_token(&server, "still-rejected").await;

    let config = seeded_config("stale");
    let client = client_for(&server, &config);

    let err = client
        .get_json::<FileListData>(
            endpoints::FILE_LIST,
            &[("parentFileId", "0".to_string())],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Auth(_)), "got {err:?}");

    // One refresh attempt, not a refresh loop
    let token_hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/access_token")
        .count();
    assert_eq!(token_hits, 1);
}
