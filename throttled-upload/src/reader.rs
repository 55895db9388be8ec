//! The throttled, observable byte source at the heart of an upload.

use crate::body::BoxReader;
use crate::bucket::TokenBucket;
use crate::error::LimitError;
use crate::monitor::{Status, StatusMonitor};
use crate::window::TimeWindow;
use jiff::Zoned;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Wraps a byte source so that reads are rate limited during a time window and counted in a
/// [`StatusMonitor`].
///
/// The reader is a cheap handle: clones share the same source, limiter and monitor. That lets a
/// transport keep one reader for a whole upload and [`reattach`](Self::reattach) it to each new
/// request body, so progress and the token bucket carry over from one physical request to the
/// next.
///
/// Reads are serialized. Each one:
///
/// 1. decides whether to throttle: a non-zero rate, and either no window or a window that
///    contains the current time,
/// 2. creates the token bucket on the first throttled read, with that read's buffer length as the
///    burst capacity,
/// 3. reads at most one burst from the source,
/// 4. waits for as many tokens as bytes were read,
/// 5. records the bytes in the monitor, even if the wait was cancelled.
#[derive(Clone)]
pub struct RateLimitedReader {
    shared: Arc<Shared>,
}

struct Shared {
    rate_limit_kbps: u32,
    monitor: Arc<StatusMonitor>,
    state: Mutex<ReaderState>,
}

struct ReaderState {
    source: Option<BoxReader>,
    window: Option<TimeWindow>,
    bucket: Option<TokenBucket>,
    cancel: CancellationToken,
}

impl RateLimitedReader {
    /// Creates a reader with no source attached yet.
    ///
    /// A `rate_limit_kbps` of `0` disables throttling; reads are still counted.
    pub fn new(
        rate_limit_kbps: u32,
        window: Option<TimeWindow>,
        monitor: Arc<StatusMonitor>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                rate_limit_kbps,
                monitor,
                state: Mutex::new(ReaderState {
                    source: None,
                    window,
                    bucket: None,
                    cancel: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Replaces the byte source and the token that cancels rate-limit waits.
    ///
    /// The previous source, if any, is dropped. The monitor and the token bucket are kept.
    pub async fn reattach(&self, source: BoxReader, cancel: CancellationToken) {
        let mut state = self.shared.state.lock().await;
        state.source = Some(source);
        state.cancel = cancel;
    }

    /// Drops the current source. Reads fail with [`LimitError::Detached`] until the next
    /// [`reattach`](Self::reattach).
    pub async fn close(&self) {
        self.shared.state.lock().await.source = None;
    }

    /// Reads into `buf`, throttling as described on [`RateLimitedReader`].
    ///
    /// Returns `Ok(0)` at the end of the source. Source errors are returned as is; a cancelled
    /// rate-limit wait or a missing source surfaces as an [`io::Error`] wrapping a
    /// [`LimitError`].
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let shared = &*self.shared;
        let mut guard = shared.state.lock().await;
        let state = &mut *guard;
        shared.monitor.mark_started();

        let throttle = shared.rate_limit_kbps > 0
            && state
                .window
                .as_mut()
                .is_none_or(|window| window.contains(&Zoned::now()));

        let mut len = buf.len();
        if throttle {
            let bucket = state.bucket.get_or_insert_with(|| {
                let bucket = TokenBucket::from_kbps(shared.rate_limit_kbps, buf.len());
                tracing::debug!(
                    rate = bucket.rate(),
                    burst = bucket.burst(),
                    "created upload rate limiter"
                );
                bucket
            });
            len = len.min(bucket.burst());
        }

        let source = state.source.as_mut().ok_or(LimitError::Detached)?;
        let n = source.read(&mut buf[..len]).await?;

        let charged = match &state.bucket {
            Some(bucket) if throttle => bucket.wait_n(n, &state.cancel).await,
            _ => Ok(()),
        };
        shared.monitor.record_read(n);
        charged?;

        Ok(n)
    }

    pub fn monitor(&self) -> &Arc<StatusMonitor> {
        &self.shared.monitor
    }

    pub fn status(&self) -> Status {
        self.shared.monitor.snapshot()
    }

    pub fn rate_limit_kbps(&self) -> u32 {
        self.shared.rate_limit_kbps
    }

    /// Burst capacity of the token bucket, once a throttled read has created it.
    pub async fn burst(&self) -> Option<usize> {
        self.shared.state.lock().await.bucket.as_ref().map(TokenBucket::burst)
    }

    /// Whether both handles refer to the same reader.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }
}

impl fmt::Debug for RateLimitedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedReader")
            .field("rate_limit_kbps", &self.shared.rate_limit_kbps)
            .field("monitor", &self.shared.monitor)
            .finish_non_exhaustive()
    }
}
