//! HTTP transport abstraction and the byte-stream currency passed between
//! pipeline stages.

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Method;
use thiserror::Error;

/// A sequentially-read byte source. Ownership is linear: each consuming
/// stage takes the stream by value, and dropping a stream (or a wrapper
/// around one) closes the underlying source.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

impl TransportError {
    fn from_http(err: impl std::fmt::Display) -> Self {
        Self::Request(err.to_string())
    }
}

/// Narrow contract for issuing one HTTP request and handing back the
/// response body as a stream. The body map is form-encoded; the
/// `Content-Type` header is set only when the map is non-empty.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: &str,
        url: &str,
        body: &BTreeMap<String, String>,
    ) -> Result<ByteStream, TransportError>;
}

/// Production transport over a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: &str,
        url: &str,
        body: &BTreeMap<String, String>,
    ) -> Result<ByteStream, TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("bad method: {method:?}")))?;

        let mut request = self.client.request(method, url);
        if !body.is_empty() {
            request = request.form(body);
        }

        let response = request.send().await.map_err(TransportError::from_http)?;
        let status = response.status().as_u16();
        if !(100..=299).contains(&status) {
            return Err(TransportError::Status {
                status,
                url: url.to_string(),
            });
        }

        tracing::debug!(%status, url, "fetched");
        Ok(response.bytes_stream().map_err(io::Error::other).boxed())
    }
}

/// Drains a stream into one contiguous buffer.
pub async fn read_all(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Wraps an in-memory buffer as a single-chunk stream.
pub fn from_bytes(bytes: impl Into<Bytes>) -> ByteStream {
    futures::stream::once(futures::future::ready(Ok(bytes.into()))).boxed()
}

/// A stream that ends immediately: "no data", as opposed to an error.
pub fn empty() -> ByteStream {
    futures::stream::empty().boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service()).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn streams_successful_response_body() {
        let base = serve(Router::new().route("/data", get(|| async { "x,y\n1,2\n" }))).await;

        let transport = HttpTransport::new();
        let stream = transport
            .send("GET", &format!("{base}/data"), &BTreeMap::new())
            .await
            .expect("send failed");

        let body = read_all(stream).await.unwrap();
        assert_eq!(body, b"x,y\n1,2\n");
    }

    #[tokio::test]
    async fn rejects_status_outside_success_range() {
        let base = serve(Router::new().route(
            "/missing",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
        ))
        .await;

        let transport = HttpTransport::new();
        let err = transport
            .send("GET", &format!("{base}/missing"), &BTreeMap::new())
            .await
            .err()
            .unwrap();

        match err {
            TransportError::Status { status, .. } => assert_eq!(status, 404),
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn rejects_malformed_method() {
        let transport = HttpTransport::new();
        let err = transport
            .send("NOT A METHOD", "http://localhost/", &BTreeMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn read_all_concatenates_chunks() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ])
        .boxed();
        assert_eq!(read_all(stream).await.unwrap(), b"abcd");
    }
}
