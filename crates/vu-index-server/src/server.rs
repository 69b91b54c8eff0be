//! An HTTP front-end for a [`PackageIndex`], laid out like a `pypi-server` instance.
//!
//! Routes:
//! - `/`: a welcome page, used by clients to probe readiness
//! - `/simple/`: all projects
//! - `/simple/{project}/`: the archives of a project, or a redirect to the fallback index
//! - `/packages/{filename}`: archive downloads

use std::convert::Infallible;
use std::fmt::Write as _;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::Error;
use crate::index::PackageIndex;
use crate::name::{is_normalized, normalize};

/// What to do when a project is not found locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Answer `404 Not Found`.
    Disabled,
    /// Redirect the client to the same project on another simple index.
    Redirect(Url),
}

/// The response to a request, before it is turned into HTTP.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Html(String),
    Redirect(StatusCode, String),
    File(PathBuf),
    NotFound,
    MethodNotAllowed,
}

/// A read-only simple index over a set of archives.
#[derive(Debug)]
pub struct IndexServer {
    index: PackageIndex,
    fallback: Fallback,
}

impl IndexServer {
    pub fn new(index: PackageIndex, fallback: Fallback) -> Self {
        Self { index, fallback }
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let server = Arc::new(self);
        let addr = listener.local_addr()?;
        info!("Serving simple index on http://{addr}");

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("Failed to accept connection: {err}");
                        continue;
                    }
                },
                () = &mut shutdown => {
                    info!("Shutting down index server on http://{addr}");
                    return Ok(());
                }
            };

            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    let method = request.method().clone();
                    let path = request.uri().path().to_string();
                    async move { Ok::<_, Infallible>(server.handle(method, path, remote).await) }
                });
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Connection from {remote} failed: {err}");
                }
            });
        }
    }

    async fn handle(
        &self,
        method: Method,
        path: String,
        remote: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let response = match self.reply(&method, &path) {
            Reply::Html(body) => html(body),
            Reply::Redirect(status, location) => Response::builder()
                .status(status)
                .header(LOCATION, location)
                .body(Full::default())
                .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR)),
            Reply::File(path) => match fs_err::tokio::read(&path).await {
                Ok(bytes) => Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(Full::new(Bytes::from(bytes)))
                    .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR)),
                Err(err) => {
                    debug!("Failed to read archive: {err}");
                    status_only(StatusCode::NOT_FOUND)
                }
            },
            Reply::NotFound => status_only(StatusCode::NOT_FOUND),
            Reply::MethodNotAllowed => status_only(StatusCode::METHOD_NOT_ALLOWED),
        };

        info!("{remote} {method} {path} {}", response.status().as_u16());

        if method == Method::HEAD {
            let (parts, _) = response.into_parts();
            return Response::from_parts(parts, Full::default());
        }
        response
    }

    pub(crate) fn reply(&self, method: &Method, path: &str) -> Reply {
        if method != Method::GET && method != Method::HEAD {
            return Reply::MethodNotAllowed;
        }

        let path = percent_decode_str(path).decode_utf8_lossy();
        trace!("Routing `{path}`");

        match path.as_ref() {
            "/" => return Reply::Html(self.welcome_page()),
            "/simple" => {
                return Reply::Redirect(StatusCode::MOVED_PERMANENTLY, "/simple/".to_string());
            }
            "/simple/" => return Reply::Html(self.project_list()),
            _ => {}
        }

        if let Some(rest) = path.strip_prefix("/simple/") {
            let project = rest.strip_suffix('/').unwrap_or(rest);
            if project.is_empty() || project.contains('/') {
                return Reply::NotFound;
            }
            return self.project_page(project);
        }

        if let Some(filename) = path.strip_prefix("/packages/") {
            return match self.index.file(filename) {
                Some(dist) => Reply::File(dist.path.clone()),
                None => Reply::NotFound,
            };
        }

        Reply::NotFound
    }

    fn welcome_page(&self) -> String {
        let mut body = page_header("Welcome to venv-update local index");
        let _ = writeln!(
            body,
            "    <p>This index serves {} project(s) under <a href=\"/simple/\">/simple/</a>.</p>",
            self.index.projects().count()
        );
        body.push_str(PAGE_FOOTER);
        body
    }

    fn project_list(&self) -> String {
        let mut body = page_header("Simple Index");
        for project in self.index.projects() {
            let project = html_escape::encode_text(project);
            let _ = writeln!(body, "    <a href=\"{project}/\">{project}</a><br>");
        }
        body.push_str(PAGE_FOOTER);
        body
    }

    fn project_page(&self, project: &str) -> Reply {
        let normalized = normalize(project);
        if !is_normalized(project) && self.index.distributions(&normalized).is_some() {
            return Reply::Redirect(
                StatusCode::MOVED_PERMANENTLY,
                format!("/simple/{normalized}/"),
            );
        }

        let Some(distributions) = self.index.distributions(&normalized) else {
            return match &self.fallback {
                Fallback::Disabled => Reply::NotFound,
                Fallback::Redirect(url) => Reply::Redirect(
                    StatusCode::SEE_OTHER,
                    format!(
                        "{}/{}/",
                        url.as_str().trim_end_matches('/'),
                        utf8_percent_encode(project, PROJECT_SEGMENT)
                    ),
                ),
            };
        };

        let mut body = page_header(&format!("Links for {normalized}"));
        for dist in distributions {
            let filename = html_escape::encode_text(&dist.filename);
            let _ = writeln!(
                body,
                "    <a href=\"/packages/{}#sha256={}\">{filename}</a><br>",
                html_escape::encode_double_quoted_attribute(&dist.filename),
                dist.sha256,
            );
        }
        body.push_str(PAGE_FOOTER);
        Reply::Html(body)
    }
}

/// Bytes escaped when a requested project name is copied into a fallback URL path segment.
const PROJECT_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const PAGE_FOOTER: &str = "  </body>\n</html>\n";

fn page_header(title: &str) -> String {
    let title = html_escape::encode_text(title);
    format!(
        "<!DOCTYPE html>\n<html>\n  <head><title>{title}</title></head>\n  <body>\n    <h1>{title}</h1>\n"
    )
}

fn html(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = status;
    response
}
