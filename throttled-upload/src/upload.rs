//! Sending one payload to an upload endpoint.

use crate::body::Body;
use crate::transport::{MediaPayload, Transport};
use bytes::{Bytes, BytesMut};
use eyre::Context;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Where and how to send the payload.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub url: Uri,
    pub method: Method,
    pub content_type: HeaderValue,
    /// Extra headers sent with every request.
    pub headers: HeaderMap,
    /// Bytes per request; `0` sends the whole payload in one request.
    pub chunk_size: usize,
}

impl UploadTarget {
    pub fn new(url: Uri) -> Self {
        Self {
            url,
            method: Method::PUT,
            content_type: HeaderValue::from_static("application/octet-stream"),
            headers: HeaderMap::new(),
            chunk_size: 0,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Performs a single upload through a [`Transport`], normally a
/// [`LimitingTransport`](crate::LimitingTransport).
///
/// Every request is tagged with [`MediaPayload`], so it is throttled regardless of its headers.
/// With a non-zero chunk size the payload goes out as a sequence of requests, each carrying a
/// `Content-Range` header. Intermediate chunks must be answered with `308 Permanent Redirect` (the
/// resumable-upload "resume incomplete" status) or a success status, and the final chunk with a
/// success status.
#[derive(Debug)]
pub struct Uploader<T> {
    transport: T,
    target: UploadTarget,
    cancel: Option<CancellationToken>,
}

impl<T: Transport> Uploader<T> {
    pub fn new(transport: T, target: UploadTarget) -> Self {
        Self {
            transport,
            target,
            cancel: None,
        }
    }

    /// Cancels rate-limit waits of this upload's requests when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// Uploads `source`, which is expected to hold `size` bytes (`0` when unknown), and returns
    /// the response to the final request.
    #[instrument(skip(self, source), fields(url = %self.target.url, chunk_size = self.target.chunk_size))]
    pub async fn upload(&self, source: Body, size: u64) -> eyre::Result<Response<Bytes>> {
        if self.target.chunk_size == 0 {
            self.upload_whole(source, size).await
        } else {
            self.upload_chunked(source, size).await
        }
    }

    async fn upload_whole(&self, source: Body, size: u64) -> eyre::Result<Response<Bytes>> {
        let mut request = self.request();
        if size > 0 {
            request = request.header(CONTENT_LENGTH, size);
        }
        let request = request.body(source).context("build upload request")?;

        let response = self
            .transport
            .round_trip(request)
            .await
            .context("upload payload")?;
        ensure_success(response)
    }

    async fn upload_chunked(&self, mut source: Body, size: u64) -> eyre::Result<Response<Bytes>> {
        let chunk_size = self.target.chunk_size;
        let total = (size > 0).then_some(size);
        let mut offset = 0;

        loop {
            let chunk = read_chunk(&mut source, chunk_size)
                .await
                .context("read payload")?;
            let len = chunk.len() as u64;
            let end = offset + len;
            let last = len == 0
                || total.is_some_and(|total| end >= total)
                || (total.is_none() && chunk.len() < chunk_size);
            let range = content_range(offset, len, total, last);

            let request = self
                .request()
                .header(CONTENT_RANGE, &range)
                .header(CONTENT_LENGTH, len)
                .body(Body::from(chunk))
                .context("build chunk request")?;
            let response = self
                .transport
                .round_trip(request)
                .await
                .wrap_err_with(|| format!("upload chunk {range}"))?;

            if last {
                return ensure_success(response);
            }

            let status = response.status();
            if !(status.is_success() || status == StatusCode::PERMANENT_REDIRECT) {
                return Err(eyre::eyre!(
                    "upload of chunk {} failed with status {}: {}",
                    range,
                    status,
                    String::from_utf8_lossy(response.body())
                ));
            }
            tracing::debug!(offset = end, "chunk accepted");
            offset = end;
        }
    }

    fn request(&self) -> http::request::Builder {
        let marker = match &self.cancel {
            Some(cancel) => MediaPayload::with_cancellation(cancel.clone()),
            None => MediaPayload::new(),
        };
        let mut request = Request::builder()
            .method(self.target.method.clone())
            .uri(self.target.url.clone())
            .header(CONTENT_TYPE, self.target.content_type.clone())
            .extension(marker);
        if let Some(headers) = request.headers_mut() {
            headers.extend(self.target.headers.clone());
        }
        request
    }
}

fn ensure_success(response: Response<Bytes>) -> eyre::Result<Response<Bytes>> {
    let status = response.status();
    if !status.is_success() {
        return Err(eyre::eyre!(
            "upload failed with status {}: {}",
            status,
            String::from_utf8_lossy(response.body())
        ));
    }
    Ok(response)
}

/// Reads until `chunk_size` bytes are buffered or the source ends.
async fn read_chunk(source: &mut Body, chunk_size: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    while filled < chunk_size {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf.freeze())
}

/// `bytes first-last/total`, with `*` for a total that is not known yet, or `bytes */total` for
/// an empty final chunk.
fn content_range(offset: u64, len: u64, total: Option<u64>, last: bool) -> String {
    let total = match total {
        Some(total) => total.to_string(),
        None if last => (offset + len).to_string(),
        None => "*".to_string(),
    };
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Seen {
        range: Option<String>,
        length: Option<String>,
        content_type: String,
        custom: Option<String>,
        marked: bool,
        body: Vec<u8>,
    }

    /// Answers like a resumable-upload endpoint: `308` until the range reaches the total.
    struct Endpoint {
        seen: Mutex<Vec<Seen>>,
        fail_with: Option<StatusCode>,
    }

    impl Endpoint {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        fn ranges(&self) -> Vec<String> {
            let seen = self.seen.lock().unwrap();
            seen.iter().filter_map(|s| s.range.clone()).collect()
        }
    }

    fn completes(range: &str) -> bool {
        let Some(range) = range.strip_prefix("bytes ") else {
            return false;
        };
        let Some((span, total)) = range.split_once('/') else {
            return false;
        };
        if total == "*" {
            return false;
        }
        match span.split_once('-') {
            Some((_, last)) => last.parse::<u64>().unwrap() + 1 == total.parse::<u64>().unwrap(),
            None => true,
        }
    }

    impl Transport for Endpoint {
        async fn round_trip(&self, request: Request<Body>) -> eyre::Result<Response<Bytes>> {
            let (parts, mut body) = request.into_parts();
            let mut data = Vec::new();
            let mut buf = [0; 7];
            loop {
                let n = body.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
            }

            let header = |name: HeaderName| {
                parts
                    .headers
                    .get(name)
                    .map(|v| v.to_str().unwrap().to_string())
            };
            let range = header(CONTENT_RANGE);
            self.seen.lock().unwrap().push(Seen {
                range: range.clone(),
                length: header(CONTENT_LENGTH),
                content_type: header(CONTENT_TYPE).unwrap_or_default(),
                custom: header(HeaderName::from_static("x-custom")),
                marked: parts.extensions.get::<MediaPayload>().is_some(),
                body: data,
            });

            let status = match (self.fail_with, &range) {
                (Some(status), _) => status,
                (None, Some(range)) if !completes(range) => StatusCode::PERMANENT_REDIRECT,
                _ => StatusCode::OK,
            };
            let mut response = Response::new(Bytes::from_static(b"done"));
            *response.status_mut() = status;
            Ok(response)
        }
    }

    fn payload(len: usize) -> Body {
        Body::from_reader(io::Cursor::new((0..len).map(|i| i as u8).collect::<Vec<_>>()))
    }

    fn target() -> UploadTarget {
        UploadTarget::new(Uri::from_static("http://upload.invalid/v1/media"))
    }

    #[tokio::test]
    async fn whole_payload_in_one_request() {
        let endpoint = Endpoint::new();
        let target = target()
            .with_content_type(HeaderValue::from_static("video/mp4"))
            .with_header(
                HeaderName::from_static("x-custom"),
                HeaderValue::from_static("yes"),
            );
        let response = Uploader::new(&endpoint, target)
            .upload(payload(25), 25)
            .await
            .unwrap();
        assert_eq!(response.body(), "done");

        let seen = endpoint.seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].range, None);
        assert_eq!(seen[0].length.as_deref(), Some("25"));
        assert_eq!(seen[0].content_type, "video/mp4");
        assert_eq!(seen[0].custom.as_deref(), Some("yes"));
        assert!(seen[0].marked);
        assert_eq!(seen[0].body.len(), 25);
    }

    #[tokio::test]
    async fn chunks_with_known_size() {
        let endpoint = Endpoint::new();
        Uploader::new(&endpoint, target().with_chunk_size(10))
            .upload(payload(25), 25)
            .await
            .unwrap();
        assert_eq!(
            endpoint.ranges(),
            ["bytes 0-9/25", "bytes 10-19/25", "bytes 20-24/25"]
        );

        let seen = endpoint.seen.into_inner().unwrap();
        let lengths: Vec<_> = seen.iter().map(|s| s.length.clone().unwrap()).collect();
        assert_eq!(lengths, ["10", "10", "5"]);
        let body: Vec<u8> = seen.into_iter().flat_map(|s| s.body).collect();
        assert_eq!(body, (0..25).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn chunk_boundary_at_end() {
        let endpoint = Endpoint::new();
        Uploader::new(&endpoint, target().with_chunk_size(10))
            .upload(payload(20), 20)
            .await
            .unwrap();
        assert_eq!(endpoint.ranges(), ["bytes 0-9/20", "bytes 10-19/20"]);
    }

    #[tokio::test]
    async fn chunks_with_unknown_size() {
        let endpoint = Endpoint::new();
        Uploader::new(&endpoint, target().with_chunk_size(10))
            .upload(payload(25), 0)
            .await
            .unwrap();
        assert_eq!(
            endpoint.ranges(),
            ["bytes 0-9/*", "bytes 10-19/*", "bytes 20-24/25"]
        );

        let endpoint = Endpoint::new();
        Uploader::new(&endpoint, target().with_chunk_size(10))
            .upload(payload(20), 0)
            .await
            .unwrap();
        assert_eq!(
            endpoint.ranges(),
            ["bytes 0-9/*", "bytes 10-19/*", "bytes */20"]
        );
    }

    #[tokio::test]
    async fn rejected_upload() {
        use insta::assert_snapshot;

        let endpoint = Endpoint {
            fail_with: Some(StatusCode::FORBIDDEN),
            ..Endpoint::new()
        };
        let err = Uploader::new(&endpoint, target())
            .upload(payload(5), 5)
            .await
            .unwrap_err();
        assert_snapshot!(err, @"upload failed with status 403 Forbidden: done");

        let err = Uploader::new(&endpoint, target().with_chunk_size(2))
            .upload(payload(5), 5)
            .await
            .unwrap_err();
        assert_snapshot!(err, @"upload of chunk bytes 0-1/5 failed with status 403 Forbidden: done");
    }

    #[test]
    fn ranges() {
        assert_eq!(content_range(0, 10, Some(100), false), "bytes 0-9/100");
        assert_eq!(content_range(90, 10, Some(100), true), "bytes 90-99/100");
        assert_eq!(content_range(10, 5, None, false), "bytes 10-14/*");
        assert_eq!(content_range(10, 5, None, true), "bytes 10-14/15");
        assert_eq!(content_range(0, 0, None, true), "bytes */0");
    }
}
