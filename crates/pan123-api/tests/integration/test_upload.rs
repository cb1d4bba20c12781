//! Upload engine scenarios against a mocked API

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pan123_api::client::endpoints;
use pan123_api::upload::{DuplicatePolicy, ParentFixer, Uploader};
use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::ports::vfs::BytesSource;
use pan123_core::{BackendError, Result};

use crate::common::{client_for, err_body, ok_body, seeded_config};

/// A fixer that reports every parent as fine (the default for tests)
struct NoFix;

#[async_trait]
impl ParentFixer for NoFix {
    async fn fix_parent(&self, stale: FileId) -> Result<FileId> {
        Ok(stale)
    }
}

/// A fixer that redirects every stale parent to the root
struct FixToRoot;

#[async_trait]
impl ParentFixer for FixToRoot {
    async fn fix_parent(&self, _stale: FileId) -> Result<FileId> {
        Ok(FileId::ROOT)
    }
}

fn source(data: &[u8]) -> BytesSource {
    BytesSource::new(data.to_vec(), RemotePath::new("up.bin").unwrap())
}

#[tokio::test]
async fn test_instant_upload_transfers_no_bytes() {
    let server = MockServer::start().await;
    // create recognizes the MD5 of "hello" and answers reuse
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .and(body_partial_json(json!({
            "etag": "5d41402abc4b2a76b9719d911017c592",
            "size": 5,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "fileID": 777, "reuse": true, "sliceSize": 0
        }))))
        .mount(&server)
        .await;

    let config = seeded_config("t");
    let client = client_for(&server, &config);
    let uploader = Uploader::new(client, 1000);

    let outcome = uploader
        .put(
            &source(b"hello"),
            FileId::new(42),
            "c.txt",
            DuplicatePolicy::Rename,
            &NoFix,
        )
        .await
        .unwrap();

    assert_eq!(outcome.file_id, FileId::new(777));
    assert_eq!(outcome.size, 5);
    assert_eq!(outcome.md5.as_str(), "5d41402abc4b2a76b9719d911017c592");

    // No payload endpoint was touched
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.path() != endpoints::SINGLE_CREATE
            && r.url.path() != endpoints::UPLOAD_SLICE));
}

#[tokio::test]
async fn test_single_step_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "reuse": false, "sliceSize": 0
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::SINGLE_CREATE))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "fileID": 31337, "completed": true
        }))))
        .mount(&server)
        .await;

    let config = seeded_config("t");
    let client = client_for(&server, &config);
    let uploader = Uploader::new(client, 1000);

    let payload = vec![7u8; 4096];
    let outcome = uploader
        .put(
            &source(&payload),
            FileId::new(1),
            "y.bin",
            DuplicatePolicy::Rename,
            &NoFix,
        )
        .await
        .unwrap();
    assert_eq!(outcome.file_id, FileId::new(31337));
    assert_eq!(outcome.size, 4096);

    // The payload went to the single-step endpoint as multipart form data
    let requests = server.received_requests().await.unwrap();
    let single = requests
        .iter()
        .find(|r| r.url.path() == endpoints::SINGLE_CREATE)
        .expect("single-step call");
    let content_type = single
        .headers
        .get("content-type")
        .expect("content type")
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&single.body);
    assert!(body.contains("parentFileID"));
    assert!(body.contains("duplicate"));
}

#[tokio::test]
async fn test_single_step_polls_completion_when_deferred() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "reuse": false, "sliceSize": 0
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::SINGLE_CREATE))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "completed": false, "preuploadID": "pre-xyz"
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_COMPLETE))
        .and(body_partial_json(json!({"preuploadID": "pre-xyz"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "completed": true, "fileID": 99
        }))))
        .mount(&server)
        .await;

    let config = seeded_config("t");
    let client = client_for(&server, &config);
    let uploader = Uploader::new(client, 1000);

    let outcome = uploader
        .put(
            &source(b"deferred"),
            FileId::new(1),
            "d.bin",
            DuplicatePolicy::Rename,
            &NoFix,
        )
        .await
        .unwrap();
    assert_eq!(outcome.file_id, FileId::new(99));
}

#[tokio::test]
async fn test_stale_parent_recovered_once() {
    let server = MockServer::start().await;
    // The cached parent 12345 is gone server-side
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .and(body_partial_json(json!({"parentFileID": 12345})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(err_body(1, "parentFileID不存在")),
        )
        .mount(&server)
        .await;
    // The retry against the repaired root succeeds via dedup
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .and(body_partial_json(json!({"parentFileID": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "fileID": 4242, "reuse": true, "sliceSize": 0
        }))))
        .mount(&server)
        .await;

    let config = seeded_config("t");
    let client = client_for(&server, &config);
    let uploader = Uploader::new(client, 1000);

    let outcome = uploader
        .put(
            &source(b"orphaned"),
            FileId::new(12345),
            "o.bin",
            DuplicatePolicy::Rename,
            &FixToRoot,
        )
        .await
        .unwrap();
    assert_eq!(outcome.file_id, FileId::new(4242));
    assert_eq!(outcome.parent_id, FileId::ROOT);
}

#[tokio::test]
async fn test_stale_parent_not_repairable_surfaces_original_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::UPLOAD_CREATE))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(err_body(1, "parentFileID不存在")),
        )
        .mount(&server)
        .await;

    let config = seeded_config("t");
    let client = client_for(&server, &config);
    let uploader = Uploader::new(client, 1000);

    // The fixer cannot improve on the stale ID, so the error surfaces
    let err = uploader
        .put(
            &source(b"x"),
            FileId::new(12345),
            "x.bin",
            DuplicatePolicy::Rename,
            &NoFix,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Protocol { .. }), "got {err:?}");
}
