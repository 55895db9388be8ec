//! HTTP transports, and the decorator that throttles upload payloads passing through them.

use crate::body::Body;
use crate::config::LimitConfig;
use crate::monitor::{Status, StatusMonitor};
use crate::reader::RateLimitedReader;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, Response};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

mod client;

pub use client::{DEFAULT_READ_BUFFER_SIZE, ReqwestTransport};

/// Header announcing the content type of a resumable upload's payload.
pub const UPLOAD_CONTENT_TYPE: &str = "x-upload-content-type";

const MEDIA_CONTENT_TYPES: [&str; 3] = ["multipart/related", "video", "application/octet-stream"];

/// Something that can execute one HTTP request and hand back the buffered response.
pub trait Transport: Send + Sync {
    fn round_trip(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = eyre::Result<Response<Bytes>>> + Send;
}

impl<T: Transport> Transport for &T {
    fn round_trip(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = eyre::Result<Response<Bytes>>> + Send {
        (**self).round_trip(request)
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn round_trip(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = eyre::Result<Response<Bytes>>> + Send {
        (**self).round_trip(request)
    }
}

/// Request extension marking a request as carrying the upload payload.
///
/// A [`LimitingTransport`] always throttles marked requests, whatever their headers say. The
/// optional token cancels rate-limit waits for this request's body; without one, the token from
/// [`LimitConfig::cancel`] is used.
#[derive(Debug, Clone, Default)]
pub struct MediaPayload {
    pub cancel: Option<CancellationToken>,
}

impl MediaPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }
}

/// Whether the headers describe a media payload: a `Content-Type` or `X-Upload-Content-Type`
/// starting with `multipart/related`, `video` or `application/octet-stream`.
pub fn looks_like_media(headers: &HeaderMap) -> bool {
    let is_media = |value: &HeaderValue| {
        value.to_str().is_ok_and(|value| {
            MEDIA_CONTENT_TYPES.iter().any(|prefix| {
                value
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
        })
    };
    headers.get(CONTENT_TYPE).is_some_and(is_media)
        || headers.get(UPLOAD_CONTENT_TYPE).is_some_and(is_media)
}

/// A [`Transport`] decorator that rate limits and observes the body of upload requests.
///
/// The first payload-carrying request gets a [`RateLimitedReader`] wrapped around its body. Every
/// later one, such as the next chunk of a resumable upload, has its body swapped into that same
/// reader, so rate limiting and progress cover the upload as a whole. All other requests pass
/// through untouched.
///
/// One transport serves one upload.
pub struct LimitingTransport<T> {
    inner: T,
    config: LimitConfig,
    monitor: Arc<StatusMonitor>,
    reader: Mutex<Option<RateLimitedReader>>,
}

impl<T> LimitingTransport<T> {
    pub fn new(inner: T, config: LimitConfig) -> Self {
        Self {
            monitor: Arc::new(StatusMonitor::new(config.file_size)),
            inner,
            config,
            reader: Mutex::new(None),
        }
    }

    /// The current upload progress.
    pub fn monitor_status(&self) -> Status {
        self.monitor.snapshot()
    }

    /// The monitor shared with the reader, for handing to a progress reporter.
    pub fn monitor(&self) -> Arc<StatusMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The cancellation token for the body of `request`, if it carries the payload.
    fn payload_cancellation<B>(&self, request: &Request<B>) -> Option<CancellationToken> {
        if let Some(marker) = request.extensions().get::<MediaPayload>() {
            return Some(
                marker
                    .cancel
                    .clone()
                    .unwrap_or_else(|| self.config.cancel.clone()),
            );
        }
        (self.config.sniff_content_type && looks_like_media(request.headers()))
            .then(|| self.config.cancel.clone())
    }

    async fn install(&self, body: &mut Body, cancel: CancellationToken) {
        let mut slot = self.reader.lock().await;
        let source = match std::mem::take(body).into_async_read() {
            Ok(source) => source,
            Err(throttled) => {
                tracing::debug!("request body is already rate limited");
                *body = throttled;
                return;
            }
        };

        if slot.is_some() {
            tracing::debug!("reattaching upload reader to new request body");
        } else {
            tracing::debug!(
                rate_limit_kbps = self.config.rate_limit_kbps,
                window = self.config.window.as_ref().map(tracing::field::display),
                "installing upload reader"
            );
        }
        let reader = slot.get_or_insert_with(|| {
            RateLimitedReader::new(
                self.config.rate_limit_kbps,
                self.config.window.clone(),
                Arc::clone(&self.monitor),
            )
        });
        reader.reattach(source, cancel).await;
        *body = Body::throttled(reader.clone());
    }
}

impl<T: Transport> Transport for LimitingTransport<T> {
    #[instrument(skip_all, fields(method = %request.method(), url = %request.uri()))]
    async fn round_trip(&self, mut request: Request<Body>) -> eyre::Result<Response<Bytes>> {
        tracing::debug!(
            content_type = ?request.headers().get(CONTENT_TYPE),
            "sending request"
        );

        if let Some(cancel) = self.payload_cancellation(&request) {
            self.install(request.body_mut(), cancel).await;
        }

        let response = self.inner.round_trip(request).await?;
        tracing::debug!(status = %response.status(), "received response");
        tracing::trace!(body = %String::from_utf8_lossy(response.body()), "response body");
        Ok(response)
    }
}
