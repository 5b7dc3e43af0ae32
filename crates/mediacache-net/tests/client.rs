use std::time::Duration;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::StreamExt;
use mediacache_net::{HttpClient, NetError, NetOptions, RangeSpec};
use rstest::*;
use tokio::net::TcpListener;
use url::Url;

// ============================================================================
// Test server infrastructure
// ============================================================================

struct TestServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            server.await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}")).unwrap(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

// ============================================================================
// Test endpoints
// ============================================================================

const BODY: &[u8] = b"0123456789abcdef";

async fn range_endpoint(headers: HeaderMap) -> impl IntoResponse {
    let raw = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some((start, end)) = raw
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)))
    else {
        return (StatusCode::BAD_REQUEST, HeaderMap::new(), Vec::new());
    };
    if start > end || end >= BODY.len() {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            HeaderMap::new(),
            Vec::new(),
        );
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, "video/mp4".parse().unwrap());
    response_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response_headers.insert(
        header::CONTENT_RANGE,
        format!("bytes {start}-{end}/{}", BODY.len()).parse().unwrap(),
    );
    (
        StatusCode::PARTIAL_CONTENT,
        response_headers,
        BODY[start..=end].to_vec(),
    )
}

/// Ignores the `Range` header entirely, like servers without range support.
async fn full_body_endpoint() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "audio/mpeg".parse().unwrap());
    (StatusCode::OK, headers, BODY.to_vec())
}

fn test_router() -> Router {
    Router::new()
        .route("/range", get(range_endpoint))
        .route("/full", get(full_body_endpoint))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
}

// ============================================================================
// Fixtures
// ============================================================================

#[fixture]
async fn test_server() -> TestServer {
    TestServer::new(test_router()).await
}

#[fixture]
fn http_client() -> HttpClient {
    HttpClient::new(&NetOptions {
        request_timeout: Duration::from_secs(5),
        ..NetOptions::default()
    })
}

async fn collect(mut stream: mediacache_net::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[rstest]
#[tokio::test]
async fn partial_content_with_range_metadata(
    #[future] test_server: TestServer,
    http_client: HttpClient,
) {
    let test_server = test_server.await;
    let url = test_server.url("/range");

    let resp = http_client
        .get_range(url, RangeSpec::from_range(&(4..12)), None)
        .await
        .unwrap();

    assert_eq!(resp.info.status, 206);
    assert_eq!(resp.info.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(resp.info.content_range.as_deref(), Some("bytes 4-11/16"));
    assert!(resp.info.accept_ranges);
    assert_eq!(collect(resp.stream).await, &BODY[4..12]);
}

#[rstest]
#[tokio::test]
async fn full_body_when_server_ignores_range(
    #[future] test_server: TestServer,
    http_client: HttpClient,
) {
    let test_server = test_server.await;
    let url = test_server.url("/full");

    let resp = http_client
        .get_range(url, RangeSpec::from_range(&(0..4)), None)
        .await
        .unwrap();

    // A 200 with the whole body is accepted; the caller clamps.
    assert_eq!(resp.info.status, 200);
    assert!(resp.info.content_range.is_none());
    assert!(!resp.info.accept_ranges);
    assert_eq!(collect(resp.stream).await, BODY);
}

#[rstest]
#[tokio::test]
async fn error_status_is_surfaced(#[future] test_server: TestServer, http_client: HttpClient) {
    let test_server = test_server.await;
    let url = test_server.url("/missing");

    let err = http_client
        .get_range(url, RangeSpec::from_start(0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::HttpStatus { status: 404, .. }));
}

#[rstest]
#[tokio::test]
async fn unsatisfiable_range_is_an_error(
    #[future] test_server: TestServer,
    http_client: HttpClient,
) {
    let test_server = test_server.await;
    let url = test_server.url("/range");

    let err = http_client
        .get_range(url, RangeSpec::from_range(&(100..200)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::HttpStatus { status: 416, .. }));
}
