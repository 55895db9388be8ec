use super::Transport;
use crate::body::Body;
use bytes::Bytes;
use eyre::Context;
use http::{Request, Response};
use tracing::instrument;

/// Size of the reads [`ReqwestTransport`] issues against streamed bodies.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

/// Executes requests with a [`reqwest::Client`].
///
/// Bodies backed by a reader are streamed in reads of `read_buffer_size` bytes. For a body
/// throttled by a [`LimitingTransport`](crate::LimitingTransport), the first such read fixes the
/// token bucket's burst, so this is also the largest amount of data that can go out without
/// waiting.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    read_buffer_size: usize,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}

impl Transport for ReqwestTransport {
    #[instrument(skip_all, fields(method = %request.method(), url = %request.uri()))]
    async fn round_trip(&self, request: Request<Body>) -> eyre::Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        let body = match body.into_bytes() {
            Ok(bytes) => reqwest::Body::from(bytes),
            Err(body) => reqwest::Body::wrap_stream(body.into_stream(self.read_buffer_size)),
        };
        let request = reqwest::Request::try_from(Request::from_parts(parts, body))
            .context("convert request for reqwest")?;

        let response = self
            .client
            .execute(request)
            .await
            .context("send request")?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await.context("read response body")?;
        tracing::trace!(%status, len = body.len(), "buffered response");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
