//! Resolver tests: pagination, validity filtering, directory creation

use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::BackendError;

use crate::common::{entry, err_body, facade_for, mount_listing, ok_body};

#[tokio::test]
async fn test_paginated_listing_filters_invalid_entries() {
    let server = MockServer::start().await;

    // Page 1 carries a live file, a trashed file, a rejected file, and a
    // directory; the cursor continues
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .and(query_param_is_missing("lastFileId"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": 1044,
            "fileList": [
                entry(1001, "a.txt", false, 3, 0),
                {"fileId": 1002, "filename": "t.bin", "type": 0, "size": 1,
                 "parentFileId": 0, "trashed": 1, "status": 0},
                {"fileId": 1003, "filename": "r.bin", "type": 0, "size": 1,
                 "parentFileId": 0, "trashed": 0, "status": 100},
                entry(1044, "docs", true, 0, 0),
            ],
        }))))
        .mount(&server)
        .await;
    // Page 2 terminates
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .and(query_param("lastFileId", "1044"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1,
            "fileList": [entry(1050, "b.txt", false, 7, 0)],
        }))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let entries = fs.resolver().list_all(FileId::ROOT).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "docs", "b.txt"]);
}

#[tokio::test]
async fn test_resolve_nested_path() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(1044, "docs", true, 0, 0)])).await;
    mount_listing(&server, 1044, json!([entry(2001, "movie.mp4", false, 9, 1044)])).await;

    let fs = facade_for(&server).await;
    let resolver = fs.resolver();

    let leaf = resolver
        .resolve_entry(FileId::ROOT, &RemotePath::new("docs/movie.mp4").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leaf.id, FileId::new(2001));
    assert!(!leaf.is_dir);

    let dir = resolver
        .resolve_dir(FileId::ROOT, &RemotePath::new("docs").unwrap())
        .await
        .unwrap();
    assert_eq!(dir, FileId::new(1044));

    let err = resolver
        .resolve_entry(FileId::ROOT, &RemotePath::new("docs/absent.bin").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_create_dir_confirms_visibility_and_caches() {
    let server = MockServer::start().await;

    // The pre-check listing is empty; after the mkdir the directory
    // shows up in listings
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1, "fileList": []
        }))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1, "fileList": [entry(777, "newdir", true, 0, 0)]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/v1/file/mkdir"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({"dirID": 777}))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let resolver = fs.resolver();

    let id = resolver.create_dir(FileId::ROOT, "newdir").await.unwrap();
    assert_eq!(id, FileId::new(777));

    let list_calls_after_create = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v2/file/list")
        .count();

    // The confirmed leaf answers from the cache with no further network
    let leaf = resolver
        .find_leaf(FileId::ROOT, "newdir")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leaf.id, FileId::new(777));
    let list_calls_now = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/v2/file/list")
        .count();
    assert_eq!(list_calls_now, list_calls_after_create);
}

#[tokio::test]
async fn test_create_dir_duplicate_race_resolves_sibling() {
    let server = MockServer::start().await;

    // Pre-check sees nothing, mkdir loses the race, the forced lookup
    // then finds the sibling
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1, "fileList": []
        }))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "lastFileId": -1, "fileList": [entry(888, "shared", true, 0, 0)]
        }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/v1/file/mkdir"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(err_body(1, "该目录下已经有同名文件夹,无法进行创建")),
        )
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;
    let id = fs
        .resolver()
        .create_dir(FileId::ROOT, "shared")
        .await
        .unwrap();
    assert_eq!(id, FileId::new(888));
}

#[tokio::test]
async fn test_verify_parent_and_repair() {
    let server = MockServer::start().await;
    // Parent 555 lists fine; parent 666 does not exist
    mount_listing(&server, 555, json!([])).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/file/list"))
        .and(query_param("parentFileId", "666"))
        .respond_with(ResponseTemplate::new(200).set_body_json(err_body(1, "父目录不存在")))
        .mount(&server)
        .await;
    mount_listing(&server, 0, json!([])).await;

    let fs = facade_for(&server).await;
    let resolver = fs.resolver();

    assert!(resolver.verify_parent(FileId::new(555)).await.unwrap());
    // Verified answers come from the cache inside the TTL
    assert!(resolver.verify_parent(FileId::new(555)).await.unwrap());
    let hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query().unwrap_or("").contains("parentFileId=555"))
        .count();
    assert_eq!(hits, 1);

    assert!(!resolver.verify_parent(FileId::new(666)).await.unwrap());

    // Repair falls back to the root for the missing parent
    let fixed = resolver.repair_parent(FileId::new(666)).await.unwrap();
    assert_eq!(fixed, FileId::ROOT);
    // And keeps a parent that still exists
    let kept = resolver.repair_parent(FileId::new(555)).await.unwrap();
    assert_eq!(kept, FileId::new(555));
}
