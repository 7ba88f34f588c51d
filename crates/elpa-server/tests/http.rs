use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use elpa_archive::{Archive, ArchiveOptions};
use elpa_config::ServerConfig;
use elpa_server::{http_date, ArchiveService};
use hyper::{header, Body, Method, Request, Response, StatusCode};

const FOO_EL: &str = ";;; foo.el --- Frobnicate\n\
;; Version: 1.2\n\
;; Package-Requires: ((emacs \"25.1\"))\n\
;;; Commentary:\n\
;; Frobnicates things.\n\
;;; Code:\n\
(provide 'foo)\n\
;;; foo.el ends here\n";

fn service(tmp: &Path) -> ArchiveService {
    let root = tmp.join("root");
    let dir = root.join("foo").join("1.2");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("foo.el"), FOO_EL).unwrap();
    File::open(&root)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        .unwrap();

    let mut options = ArchiveOptions::new(root, tmp.join("store"));
    options.revalidate = false;
    ArchiveService::new(Archive::new(options), &ServerConfig::default())
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn serves_archive_contents_with_last_modified() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());

    let response = service
        .handle(request(Method::GET, "/packages/archive-contents"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        "Tue, 14 Nov 2023 22:13:20 GMT"
    );
    assert_eq!(
        body_text(response).await,
        "(1\n (foo . [(1 2) ((emacs (25 1))) \"Frobnicate\" single]))\n"
    );
}

#[tokio::test]
async fn if_modified_since_yields_not_modified() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());
    let generated_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    for (since, expected) in [
        (generated_at, StatusCode::NOT_MODIFIED),
        (generated_at + Duration::from_secs(60), StatusCode::NOT_MODIFIED),
        (generated_at - Duration::from_secs(1), StatusCode::OK),
    ] {
        let mut req = request(Method::GET, "/packages/archive-contents");
        req.headers_mut().insert(
            header::IF_MODIFIED_SINCE,
            http_date::format(since).parse().unwrap(),
        );
        let response = service.handle(req).await;
        assert_eq!(response.status(), expected);
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
    }
}

#[tokio::test]
async fn head_has_headers_but_no_body() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());

    let response = service
        .handle(request(Method::HEAD, "/packages/archive-contents"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(response.headers()[header::CONTENT_LENGTH], "0");
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn serves_indexed_artifacts_and_readmes() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());

    let response = service
        .handle(request(Method::GET, "/packages/foo-1.2.el"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, FOO_EL);

    let response = service
        .handle(request(Method::GET, "/packages/foo-readme.txt"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Frobnicates things.");

    for uri in [
        "/packages/foo-1.0.el",
        "/packages/foo-1.2.tar",
        "/packages/bar-1.0.el",
        "/packages/bar-readme.txt",
        "/packages/unknown",
        "/elsewhere/archive-contents",
    ] {
        let response = service.handle(request(Method::GET, uri)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn wrong_methods_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());

    let response = service
        .handle(request(Method::POST, "/packages/archive-contents"))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");

    let response = service
        .handle(request(Method::GET, "/admin/refresh"))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn admin_refresh_rebuilds_the_index() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(tmp.path());
    assert_eq!(
        service
            .handle(request(Method::GET, "/packages/archive-contents"))
            .await
            .status(),
        StatusCode::OK
    );

    let dir = tmp.path().join("root").join("foo").join("2.0");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("foo.el"), FOO_EL.replace("1.2", "2.0")).unwrap();

    let response = service
        .handle(request(Method::POST, "/admin/refresh?level=5"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"packages":1}"#);

    let response = service
        .handle(request(Method::GET, "/packages/foo-2.0.el"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = service
        .handle(request(Method::POST, "/admin/refresh?level=high"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
