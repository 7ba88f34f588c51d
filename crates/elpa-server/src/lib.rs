//! HTTP front end for an [`elpa_archive::Archive`].
//!
//! Routes, relative to the configured prefix:
//!
//! - `GET|HEAD <prefix>/archive-contents`
//! - `GET|HEAD <prefix>/<name>-<version>.<ext>`
//! - `GET|HEAD <prefix>/<name>-readme.txt`
//! - `POST /admin/refresh?level=N`
#![forbid(unsafe_code)]

pub mod http_date;
mod routes;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::SystemTime;

use elpa_archive::{Archive, ArchiveSnapshot};
use elpa_config::ServerConfig;
use elpa_package::PackageKind;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::routes::{parse_archive_path, ArchiveRoute};

pub const ADMIN_REFRESH_PATH: &str = "/admin/refresh";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
    #[error("http server failed: {0}")]
    Serve(#[from] hyper::Error),
}

/// Request handler shared by every connection.
#[derive(Clone, Debug)]
pub struct ArchiveService {
    archive: Archive,
    prefix: String,
}

impl ArchiveService {
    pub fn new(archive: Archive, config: &ServerConfig) -> Self {
        Self {
            archive,
            prefix: config.normalized_prefix(),
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let response = self.route(&req).await;
        tracing::debug!(
            target: "elpa.server",
            %method,
            path = %path,
            status = response.status().as_u16(),
            "handled request"
        );
        response
    }

    async fn route(&self, req: &Request<Body>) -> Response<Body> {
        let path = req.uri().path();

        if path == ADMIN_REFRESH_PATH {
            if req.method() != Method::POST {
                return method_not_allowed("POST");
            }
            return self.refresh(req.uri().query()).await;
        }

        let Some(file) = path
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return empty(StatusCode::NOT_FOUND);
        };
        let Some(route) = parse_archive_path(file, &self.archive.options().extensions) else {
            return empty(StatusCode::NOT_FOUND);
        };
        let head = if req.method() == Method::GET {
            false
        } else if req.method() == Method::HEAD {
            true
        } else {
            return method_not_allowed("GET, HEAD");
        };

        let Some(snapshot) = self.snapshot().await else {
            return empty(StatusCode::INTERNAL_SERVER_ERROR);
        };
        match route {
            ArchiveRoute::Contents => contents(req, &snapshot, head),
            ArchiveRoute::Readme { name } => match snapshot.get(name) {
                Some(descriptor) => {
                    let text = descriptor
                        .commentary
                        .clone()
                        .unwrap_or_else(|| descriptor.summary.clone());
                    text_response(text, "text/plain; charset=utf-8", head)
                }
                None => empty(StatusCode::NOT_FOUND),
            },
            ArchiveRoute::Artifact {
                name,
                version,
                kind,
            } => {
                let Some(descriptor) = snapshot.get(name) else {
                    return empty(StatusCode::NOT_FOUND);
                };
                if descriptor.kind != kind || descriptor.version.to_string() != version {
                    return empty(StatusCode::NOT_FOUND);
                }
                let path = self.archive.artifact_path(descriptor);
                self.artifact(&path, kind, head).await
            }
        }
    }

    async fn snapshot(&self) -> Option<ArchiveSnapshot> {
        let archive = self.archive.clone();
        match tokio::task::spawn_blocking(move || archive.snapshot()).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::error!(target: "elpa.server", error = %err, "snapshot task failed");
                None
            }
        }
    }

    async fn refresh(&self, query: Option<&str>) -> Response<Body> {
        let Some(level) = refresh_level(query) else {
            return empty(StatusCode::BAD_REQUEST);
        };
        let archive = self.archive.clone();
        let snapshot = match tokio::task::spawn_blocking(move || archive.refresh(level)).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(target: "elpa.server", error = %err, "refresh task failed");
                return empty(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let body = serde_json::json!({ "packages": snapshot.len() }).to_string();
        text_response(body, "application/json", false)
    }

    async fn artifact(
        &self,
        path: &std::path::Path,
        kind: PackageKind,
        head: bool,
    ) -> Response<Body> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return empty(StatusCode::NOT_FOUND);
            }
            Err(err) => {
                tracing::warn!(
                    target: "elpa.server",
                    path = %path.display(),
                    error = %err,
                    "failed to read package artifact"
                );
                return empty(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let content_type = match kind {
            PackageKind::SingleFile => "text/plain; charset=utf-8",
            PackageKind::Bundle => "application/x-tar",
        };
        bytes_response(bytes, content_type, head)
    }
}

fn contents(req: &Request<Body>, snapshot: &ArchiveSnapshot, head: bool) -> Response<Body> {
    let generated_at = snapshot.generated_at();
    let last_modified = http_date::format(generated_at);

    if not_modified_since(req, generated_at) {
        let mut response = empty(StatusCode::NOT_MODIFIED);
        insert_header(&mut response, header::LAST_MODIFIED, &last_modified);
        return response;
    }

    let mut response = text_response(snapshot.render(), "text/plain; charset=utf-8", head);
    insert_header(&mut response, header::LAST_MODIFIED, &last_modified);
    response
}

fn not_modified_since(req: &Request<Body>, generated_at: SystemTime) -> bool {
    req.headers()
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(http_date::parse)
        .is_some_and(|since| http_date::unix_secs(generated_at) <= http_date::unix_secs(since))
}

/// `level=N` from the query string; 0 when absent, `None` when malformed.
fn refresh_level(query: Option<&str>) -> Option<u32> {
    let level = query
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| pair.strip_prefix("level="));
    match level {
        Some(value) => value.parse().ok(),
        None => Some(0),
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn method_not_allowed(allow: &'static str) -> Response<Body> {
    let mut response = empty(StatusCode::METHOD_NOT_ALLOWED);
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

fn text_response(text: String, content_type: &'static str, head: bool) -> Response<Body> {
    bytes_response(text.into_bytes(), content_type, head)
}

fn bytes_response(bytes: Vec<u8>, content_type: &'static str, head: bool) -> Response<Body> {
    let len = bytes.len();
    let mut response = if head {
        Response::new(Body::empty())
    } else {
        Response::new(Body::from(bytes))
    };
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response
}

fn insert_header(response: &mut Response<Body>, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

/// Serves `archive` on `config.bind` until `shutdown` resolves.
pub async fn serve_with_shutdown(
    archive: Archive,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    let service = ArchiveService::new(archive, config);
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(req).await) }
            }))
        }
    });

    let server = Server::try_bind(&config.bind)
        .map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?
        .serve(make_svc);
    tracing::info!(
        target: "elpa.server",
        addr = %server.local_addr(),
        prefix = %config.normalized_prefix(),
        "serving package archive"
    );

    server.with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Serves until Ctrl-C.
pub async fn serve(archive: Archive, config: &ServerConfig) -> Result<(), ServerError> {
    serve_with_shutdown(archive, config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(target: "elpa.server", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}
