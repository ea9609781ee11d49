//! Helpers for testing the image loader against a real HTTP server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`ImageServer`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, the ports remain open and all
//!    connections to it will time out. To avoid this, assign it to a variable:
//!    `let server = ImageServer::new();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{self, OriginalUri, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// A valid 1x1 transparent PNG.
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `imgloader_service` crate and
///    mutes all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("imgloader_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

async fn count_hits(
    State(hits): State<Hits>,
    OriginalUri(uri): OriginalUri,
    req: Request,
    next: Next,
) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(uri.path().to_owned()).or_default() += 1;
    }
    next.run(req).await
}

fn png() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], PNG).into_response()
}

/// An image server with scripted misbehavior that counts requests per path.
///
/// Routes:
///
///  - `/images/*path`: a PNG image.
///  - `/missing/*path`: `404 Not Found`.
///  - `/respond_statuscode/:num/*path`: an empty response with the given status.
///  - `/delay/:time/*path`: redirects to `/path` after the given humantime duration.
///  - `/flaky/:failures/*path`: `503 Service Unavailable` for the first `failures` requests,
///    then a PNG image.
///  - `/not_an_image/*path`: an HTML page.
pub struct ImageServer {
    server: Server,
    hits: Hits,
}

impl ImageServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route("/images/*path", get(|| async { png() }))
            .route("/missing/*path", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/respond_statuscode/:num/*path",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        (StatusCode::FOUND, [("Location", format!("/{}", path))])
                    },
                ),
            )
            .route(
                "/flaky/:failures/*path",
                get(
                    |State(hits): State<Hits>,
                     OriginalUri(uri): OriginalUri,
                     extract::Path((failures, _)): extract::Path<(usize, String)>| async move {
                        let seen = hits.lock().unwrap().get(uri.path()).copied();
                        if seen.unwrap_or_default() <= failures {
                            StatusCode::SERVICE_UNAVAILABLE.into_response()
                        } else {
                            png()
                        }
                    },
                ),
            )
            .route(
                "/not_an_image/*path",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        "<html><body>Sign in to continue</body></html>",
                    )
                }),
            )
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits))
            .with_state(hits.clone());

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Total number of requests, resetting the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Number of requests to `path`.
    pub fn hits(&self, path: &str) -> usize {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.hits.lock().unwrap().get(&path).copied().unwrap_or_default()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}
