use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::{debug, error, trace, warn};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use torrentcast_core::config::EngineSettings;
use torrentcast_core::estimator::BitrateEstimator;
use torrentcast_core::piece_store::PieceStore;
use torrentcast_core::scheduler::Scheduler;
use torrentcast_core::session::Session;

use crate::error::{Error, Result};
use crate::media_type::media_type_for;
use crate::piece_stream::PieceStream;
use crate::range::Range;
use crate::remux::RemuxPipeline;

const ACCEPT_RANGES_TYPE: &str = "bytes";
const CACHE_CONTROL_VALUE: &str = "no-cache, no-store, must-revalidate";
const CONNECTION_TYPE: &str = "Keep-Alive";
const CORS_ALLOW_ORIGIN: &str = "*";

/// Binds the first free loopback port starting at `start_port`, mirroring
/// the teacher's sequential port-probe idiom in
/// `core::utils::network::available_socket` but targeting
/// `127.0.0.1` rather than a LAN-facing address, per spec §4.E.
async fn bind_from(start_port: u16) -> std::io::Result<TcpListener> {
    let mut port = start_port;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(_) if port < u16::MAX => port += 1,
            Err(e) => return Err(e),
        }
    }
}

fn cors_headers(response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static(ACCEPT_RANGES_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_else(|e| {
            error!("Failed to build response, {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Body::empty()).into_response()
        });
    cors_headers(&mut response);
    response
}

fn not_satisfiable_response(resource_len: u64) -> Response<Body> {
    let mut response = empty_response(StatusCode::from_u16(416).unwrap());
    response.headers_mut().insert(
        CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes */{}", resource_len)).unwrap(),
    );
    response
}

/// The raw HTTP range server, per spec §4.E.
///
/// Built on `axum` + `tokio::net::TcpListener`, mirroring the current
/// generation of the teacher's own streaming server
/// (`core::stream::server::StreamServer`) instead of its older `warp`-based
/// predecessor.
#[derive(Debug, Clone)]
pub struct RawServer {
    inner: Arc<InnerRawServer>,
}

#[derive(Debug)]
struct InnerRawServer {
    addr: SocketAddr,
    session: Arc<Session>,
    piece_store: Arc<PieceStore>,
    estimator: Arc<BitrateEstimator>,
    cancellation_token: CancellationToken,
}

impl RawServer {
    /// Binds the first free loopback port at or above `settings.raw_port`
    /// and starts serving the session's selected file.
    pub async fn start(
        session: Arc<Session>,
        piece_store: Arc<PieceStore>,
        estimator: Arc<BitrateEstimator>,
        settings: &EngineSettings,
    ) -> Result<Self> {
        let listener = bind_from(settings.raw_port).await?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(InnerRawServer {
            addr,
            session,
            piece_store,
            estimator,
            cancellation_token: CancellationToken::new(),
        });

        let state = inner.clone();
        let cancellation_token = inner.cancellation_token.clone();
        tokio::spawn(async move {
            let router = Router::new()
                .route(
                    "/",
                    get(Self::do_get)
                        .head(Self::do_head)
                        .options(Self::do_options),
                )
                .with_state(state);

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
            {
                error!("Raw HTTP range server failed, {}", e);
            }
        });

        debug!("Raw HTTP range server listening on {}", addr);
        Ok(Self { inner })
    }

    /// The bound loopback address, e.g. `http://127.0.0.1:9090/`.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Stops serving; in-flight responses end with the stream closing.
    pub fn stop(&self) {
        self.inner.cancellation_token.cancel();
    }

    async fn do_options() -> impl IntoResponse {
        let mut response = empty_response(StatusCode::OK);
        let headers = response.headers_mut();
        headers.insert(
            "Allow-Methods",
            HeaderValue::from_static("GET, HEAD, OPTIONS"),
        );
        headers.insert(
            "Allow-Headers",
            HeaderValue::from_static("Range, Content-Type"),
        );
        response
    }

    async fn do_head(
        State(state): State<Arc<InnerRawServer>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        state.handle_request(headers, Method::HEAD).await
    }

    async fn do_get(
        State(state): State<Arc<InnerRawServer>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        state.handle_request(headers, Method::GET).await
    }
}

impl InnerRawServer {
    async fn handle_request(&self, headers: HeaderMap, method: Method) -> Response<Body> {
        let file = &self.session.selected_file;
        let resource_len = file.length;
        let media_type = media_type_for(&file.name);

        let range = match headers.get(RANGE) {
            None => None,
            Some(value) => match value.to_str().ok().and_then(|v| Range::parse(v).ok()) {
                Some(mut ranges) if !ranges.is_empty() => Some(ranges.remove(0)),
                _ => {
                    warn!("Ignoring malformed Range header on raw stream request");
                    None
                }
            },
        };

        let (start, end, status) = match &range {
            None => (0, resource_len.saturating_sub(1), StatusCode::OK),
            Some(range) => match range.resolve(resource_len) {
                Some((start, end)) => (start, end, StatusCode::PARTIAL_CONTENT),
                None => {
                    trace!("Range {} is not satisfiable for {} bytes", range, resource_len);
                    return not_satisfiable_response(resource_len);
                }
            },
        };

        self.session.read_head.record_byte_offset(start);
        self.estimator.observe_range_request(start, Instant::now());

        let content_length = end.saturating_sub(start) + 1;
        let content_range = format!("bytes {}-{}/{}", start, end, resource_len);

        let mut builder = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, HeaderValue::from(media_type))
            .header(CONTENT_RANGE, &content_range)
            .header(CONTENT_LENGTH, content_length)
            .header(CONNECTION, CONNECTION_TYPE);

        let body = match method {
            Method::HEAD => Body::empty(),
            _ => {
                let stream = PieceStream::new(
                    self.piece_store.clone(),
                    self.session.torrent.clone(),
                    file,
                    start,
                    Some(end),
                );
                Body::from_stream(stream)
            }
        };

        let mut response = builder
            .body(body)
            .unwrap_or_else(|e| {
                error!("Failed to build raw stream response, {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, Body::empty()).into_response()
            });
        cors_headers(&mut response);
        response
    }
}

#[derive(Debug, Deserialize)]
struct RemuxQuery {
    #[serde(default, rename = "t")]
    t_seconds: f64,
}

/// The remux HTTP server, per spec §4.F.
#[derive(Debug, Clone)]
pub struct RemuxServer {
    inner: Arc<InnerRemuxServer>,
}

#[derive(Debug)]
struct InnerRemuxServer {
    addr: SocketAddr,
    pipeline: Arc<RemuxPipeline>,
    cancellation_token: CancellationToken,
}

impl RemuxServer {
    pub async fn start(pipeline: Arc<RemuxPipeline>, settings: &EngineSettings) -> Result<Self> {
        let listener = bind_from(settings.remux_port).await?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(InnerRemuxServer {
            addr,
            pipeline,
            cancellation_token: CancellationToken::new(),
        });

        let state = inner.clone();
        let cancellation_token = inner.cancellation_token.clone();
        tokio::spawn(async move {
            let router = Router::new()
                .route("/", get(Self::do_get).head(Self::do_head))
                .with_state(state);

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
            {
                error!("Remux HTTP server failed, {}", e);
            }
        });

        debug!("Remux HTTP server listening on {}", addr);
        Ok(Self { inner })
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    pub fn stop(&self) {
        self.inner.cancellation_token.cancel();
    }

    async fn do_get(
        State(state): State<Arc<InnerRemuxServer>>,
        Query(query): Query<RemuxQuery>,
    ) -> impl IntoResponse {
        state.handle_request(query.t_seconds).await
    }

    async fn do_head(State(state): State<Arc<InnerRemuxServer>>) -> impl IntoResponse {
        let mut response = empty_response(StatusCode::OK);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        response
    }
}

impl InnerRemuxServer {
    async fn handle_request(&self, t_seconds: f64) -> Response<Body> {
        match self.pipeline.start(t_seconds).await {
            Ok(body) => {
                let mut response = Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, HeaderValue::from_static("video/mp4"))
                    .header("Transfer-Encoding", HeaderValue::from_static("chunked"))
                    .body(Body::from_stream(body))
                    .unwrap_or_else(|e| {
                        error!("Failed to build remux response, {}", e);
                        (StatusCode::INTERNAL_SERVER_ERROR, Body::empty()).into_response()
                    });
                cors_headers(&mut response);
                response
            }
            Err(Error::Io(e)) => {
                error!("Failed to start remux, {}", e);
                empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(e) => {
                error!("Failed to start remux, {}", e);
                empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_from_finds_free_port() {
        let listener = bind_from(0).await.expect("expected a bound listener");
        let addr = listener.local_addr().unwrap();

        assert_eq!(Ipv4Addr::LOCALHOST, *addr.ip().to_string().parse::<Ipv4Addr>().as_ref().unwrap());
    }

    #[tokio::test]
    async fn test_bind_from_skips_occupied_port() {
        let first = bind_from(0).await.unwrap();
        let occupied_port = first.local_addr().unwrap().port();

        let second = bind_from(occupied_port).await.unwrap();

        assert_ne!(occupied_port, second.local_addr().unwrap().port());
    }
}
