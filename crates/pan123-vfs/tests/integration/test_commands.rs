//! Backend command tests: media-sync shadow files and download-URL
//! extraction

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pan123_core::domain::newtypes::RemotePath;
use pan123_vfs::commands::{get_download_url, media_sync, MediaSyncOptions};

use crate::common::{entry, facade_for, mount_listing, ok_body};

async fn mount_media_tree(server: &MockServer) {
    mount_listing(
        server,
        0,
        json!([
            entry(1044, "movies", true, 0, 0),
            entry(2002, "clip.mp4", false, 100, 0),
            entry(2005, "readme.txt", false, 10, 0),
        ]),
    )
    .await;
    mount_listing(
        server,
        1044,
        json!([
            entry(2003, "film.mkv", false, 5000, 1044),
            entry(2004, "tiny.mp4", false, 3, 1044),
        ]),
    )
    .await;
}

#[tokio::test]
async fn test_media_sync_writes_strm_tree() {
    let server = MockServer::start().await;
    mount_media_tree(&server).await;

    let fs = facade_for(&server).await;
    let target = tempfile::tempdir().unwrap();

    let opts = MediaSyncOptions {
        include_extensions: vec!["mp4".into(), "mkv".into()],
        min_size: 10,
        ..MediaSyncOptions::default()
    };
    let report = media_sync(&fs, &RemotePath::root(), target.path(), &opts)
        .await
        .unwrap();

    // clip.mp4 and film.mkv pass; readme.txt (extension) and tiny.mp4
    // (size) do not
    assert_eq!(report.created, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.deleted, 0);

    let clip = std::fs::read_to_string(target.path().join("clip.strm")).unwrap();
    assert_eq!(clip, "123://2002");
    let film = std::fs::read_to_string(target.path().join("movies/film.strm")).unwrap();
    assert_eq!(film, "123://2003");
}

#[tokio::test]
async fn test_media_sync_is_idempotent_and_sweeps_stale() {
    let server = MockServer::start().await;
    mount_media_tree(&server).await;

    let fs = facade_for(&server).await;
    let target = tempfile::tempdir().unwrap();
    let opts = MediaSyncOptions {
        include_extensions: vec!["mp4".into(), "mkv".into()],
        min_size: 10,
        sync_delete: true,
        ..MediaSyncOptions::default()
    };

    let first = media_sync(&fs, &RemotePath::root(), target.path(), &opts)
        .await
        .unwrap();
    assert_eq!(first.created, 2);

    // A shadow file whose remote counterpart is gone
    std::fs::write(target.path().join("stale.strm"), "123://999").unwrap();
    // A non-strm bystander must survive the sweep
    std::fs::write(target.path().join("notes.txt"), "keep me").unwrap();

    let second = media_sync(&fs, &RemotePath::root(), target.path(), &opts)
        .await
        .unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.deleted, 1);
    assert!(!target.path().join("stale.strm").exists());
    assert!(target.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_media_sync_dry_run_touches_nothing() {
    let server = MockServer::start().await;
    mount_media_tree(&server).await;

    let fs = facade_for(&server).await;
    let target = tempfile::tempdir().unwrap();
    let opts = MediaSyncOptions {
        dry_run: true,
        ..MediaSyncOptions::default()
    };
    let report = media_sync(&fs, &RemotePath::root(), target.path(), &opts)
        .await
        .unwrap();
    assert!(report.created > 0);
    assert!(std::fs::read_dir(target.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_media_sync_path_mode() {
    let server = MockServer::start().await;
    mount_media_tree(&server).await;

    let fs = facade_for(&server).await;
    let target = tempfile::tempdir().unwrap();
    let opts = MediaSyncOptions {
        include_extensions: vec!["mkv".into()],
        path_mode: true,
        ..MediaSyncOptions::default()
    };
    media_sync(&fs, &RemotePath::root(), target.path(), &opts)
        .await
        .unwrap();

    let film = std::fs::read_to_string(target.path().join("movies/film.strm")).unwrap();
    assert_eq!(film, "/movies/film.mkv");
}

#[tokio::test]
async fn test_get_download_url_by_reference_and_path() {
    let server = MockServer::start().await;
    mount_listing(&server, 0, json!([entry(2002, "clip.mp4", false, 100, 0)])).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/file/detail"))
        .and(query_param("fileID", "2002"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ok_body(entry(2002, "clip.mp4", false, 100, 0))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/file/download_info"))
        .and(query_param("fileId", "2002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "downloadUrl": "https://cdn.example.com/2002"
        }))))
        .mount(&server)
        .await;

    let fs = facade_for(&server).await;

    let by_scheme = get_download_url(&fs, "123://2002", None).await.unwrap();
    assert_eq!(by_scheme, "https://cdn.example.com/2002");

    let by_id = get_download_url(&fs, "2002", None).await.unwrap();
    assert_eq!(by_id, "https://cdn.example.com/2002");

    let by_path = get_download_url(&fs, "clip.mp4", Some("MediaBox/1.0"))
        .await
        .unwrap();
    assert_eq!(by_path, "https://cdn.example.com/2002");
}
