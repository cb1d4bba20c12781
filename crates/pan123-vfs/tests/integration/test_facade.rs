//! Facade-level tests: listing, object lookup, move collisions, purge,
//! and about

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pan123_core::domain::entry::Object;
use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::ports::vfs::RemoteFs;
use pan123_core::BackendError;

use crate::common::{entry, err_body, facade_for, mount_listing, ok_body};

fn object(id: i64, remote: &str, size: u64) -> Object {
    Object {
        id: FileId::new(id),
        remote: RemotePath::new(remote).unwrap(),
        size,
        md5: None,
        mod_time: None,
        is_dir: false,
    }
}

#[tokio::test]
async fn test_list_returns_valid_objects() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        0,
        json!([
            entry(1001, "a.txt", false, 3, 0),
            entry(1044, "docs", true, 0, 0),
            {"fileId": 1002, "filename": "gone.bin", "type": 0, "size": 1,
             "parentFileId": 0, "trashed": 1, "status": 0},
        ]),
    )
    .await;

    let fs = facade_for(&server).await;
    let objects = fs.list(&RemotePath::root()).await.unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].remote.as_str(), "a.txt");
    assert_eq!(objects[0].size, 3);
    assert!(!objects[0].is_dir);
    assert_eq!(objects[1].remote.as_str(), "docs");
    assert!(objects[1].is_dir);
}

#[tokio::test]
async fn test_new_object_rejects_directories() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(1044, "docs", true, 0, 0)])).await;

    let fs = facade_for(&server).await;
    let err = fs
        .new_object(&RemotePath::new("docs").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotAFile(_)), "got {err:?}");
}

#[tokio::test]
async fn test_new_object_fetches_detail() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(2001, "movie.mp4", false, 9, 0)])).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/file/detail"))
        .and(query_param("fileID", "2001"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ok_body(entry(2001, "movie.mp4", false, 9, 0))),
        )
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let obj = fs
        .new_object(&RemotePath::new("movie.mp4").unwrap())
        .await
        .unwrap();
    assert_eq!(obj.id, FileId::new(2001));
    assert_eq!(obj.size, 9);
    assert_eq!(
        obj.md5.as_ref().map(|m| m.as_str()),
        Some("5d41402abc4b2a76b9719d911017c592")
    );
    assert!(obj.mod_time.is_some());
}

#[tokio::test]
async fn test_move_collision_picks_unique_name() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        0,
        json!([entry(100, "A", true, 0, 0), entry(200, "B", true, 0, 0)]),
    )
    .await;
    mount_listing(&server, 100, json!([entry(3001, "x.mp4", false, 50, 100)])).await;
    // B already holds a different x.mp4
    mount_listing(&server, 200, json!([entry(3002, "x.mp4", false, 60, 200)])).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/file/move"))
        .and(body_partial_json(json!({"fileIDs": [3001], "toParentFileID": 200})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!(null))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/file/name"))
        .and(body_partial_json(json!({"fileId": 3001, "fileName": "x (1).mp4"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!(null))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let src = object(3001, "A/x.mp4", 50);
    let moved = fs
        .move_object(&src, &RemotePath::new("B/x.mp4").unwrap())
        .await
        .unwrap();
    assert_eq!(moved.id, FileId::new(3001));
    assert_eq!(moved.remote.as_str(), "B/x (1).mp4");

    // The incumbent 3002 was never touched
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.path() != "/api/v1/file/trash"));
    let renames = requests
        .iter()
        .filter(|r| r.url.path() == "/api/v1/file/name")
        .count();
    assert_eq!(renames, 1);
}

#[tokio::test]
async fn test_same_parent_move_with_same_name_is_a_no_op() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(100, "A", true, 0, 0)])).await;
    mount_listing(&server, 100, json!([entry(3001, "x.mp4", false, 50, 100)])).await;

    let fs = facade_for(&server).await;
    let src = object(3001, "A/x.mp4", 50);
    let moved = fs
        .move_object(&src, &RemotePath::new("A/x.mp4").unwrap())
        .await
        .unwrap();
    assert_eq!(moved.remote.as_str(), "A/x.mp4");

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| {
        r.url.path() != "/api/v1/file/move" && r.url.path() != "/api/v1/file/name"
    }));
}

#[tokio::test]
async fn test_purge_continues_past_failures_and_reports_them() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(500, "junk", true, 0, 0)])).await;
    mount_listing(
        &server,
        500,
        json!([
            entry(601, "one.bin", false, 1, 500),
            entry(602, "two.bin", false, 1, 500),
        ]),
    )
    .await;
    // Every trash attempt is rejected
    Mock::given(method("POST"))
        .and(path("/api/v1/file/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(err_body(1, "审核中,无法删除")))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let err = fs
        .purge(&RemotePath::new("junk").unwrap())
        .await
        .unwrap_err();
    match err {
        BackendError::Protocol { message, .. } => {
            assert!(message.contains('2'), "message should count failures: {message}");
        }
        other => panic!("expected aggregated protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_purge_trashes_contents_then_directory() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(500, "junk", true, 0, 0)])).await;
    // One page of content, then an empty directory
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1,
            "fileList": [entry(601, "one.bin", false, 1, 500)],
        }))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1, "fileList": []
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/file/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!(null))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    fs.purge(&RemotePath::new("junk").unwrap()).await.unwrap();

    let trash_bodies: Vec<serde_json::Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/file/trash")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(trash_bodies.len(), 2);
    assert_eq!(trash_bodies[0]["fileIDs"], json!([601]));
    assert_eq!(trash_bodies[1]["fileIDs"], json!([500]));
}

#[tokio::test]
async fn test_rmdir_refuses_non_empty_directory() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(500, "full", true, 0, 0)])).await;
    mount_listing(&server, 500, json!([entry(601, "kid.bin", false, 1, 500)])).await;

    let fs = facade_for(&server).await;
    let err = fs
        .rmdir(&RemotePath::new("full").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn test_about_reports_usage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "uid": 1,
            "nickname": "tester",
            "spaceUsed": 40,
            "spacePermanent": 100,
            "spaceTemp": 5
        }))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let usage = fs.about().await.unwrap();
    assert_eq!(usage.total, Some(105));
    assert_eq!(usage.used, Some(40));
    assert_eq!(usage.free, Some(65));
}
