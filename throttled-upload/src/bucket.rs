//! Byte-granular token bucket.

use crate::error::LimitError;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

/// Bytes per second in one kilobit per second.
pub const BYTES_PER_KBPS: u64 = 125;

/// A token bucket where one token is the permission to move one byte.
///
/// The bucket starts full and refills at a fixed rate up to its burst capacity. Both are fixed
/// at construction. [`RateLimitedReader`](crate::RateLimitedReader) creates its bucket on the
/// first throttled read and uses the length of that read's buffer as the burst, so the burst is
/// whatever chunk size drives the reads (see
/// [`ReqwestTransport::with_read_buffer_size`](crate::transport::ReqwestTransport::with_read_buffer_size)).
pub struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    rate: NonZeroU32,
    burst: NonZeroU32,
}

impl TokenBucket {
    /// Values are clamped to `1..=u32::MAX`.
    pub fn new(bytes_per_sec: u64, burst: usize) -> Self {
        let rate = clamp(bytes_per_sec);
        let burst = clamp(burst as u64);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            rate,
            burst,
        }
    }

    /// A bucket refilling at `kbps` kilobits per second.
    pub fn from_kbps(kbps: u32, burst: usize) -> Self {
        Self::new(u64::from(kbps) * BYTES_PER_KBPS, burst)
    }

    /// Refill rate in bytes per second.
    pub fn rate(&self) -> u32 {
        self.rate.get()
    }

    pub fn burst(&self) -> usize {
        self.burst.get() as usize
    }

    /// Waits until `n` tokens are available and takes them.
    ///
    /// `n` is capped at the burst capacity, and waiting for zero tokens returns immediately.
    /// Returns [`LimitError::Cancelled`] as soon as `cancel` fires, including when it was
    /// cancelled before the call.
    pub async fn wait_n(&self, n: usize, cancel: &CancellationToken) -> Result<(), LimitError> {
        let n = n.min(self.burst());
        let Some(tokens) = NonZeroU32::new(n as u32) else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LimitError::Cancelled),
            ready = self.limiter.until_n_ready(tokens) => {
                ready.map_err(|insufficient| LimitError::Capacity {
                    requested: n,
                    capacity: insufficient.0,
                })
            }
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}

fn clamp(value: u64) -> NonZeroU32 {
    NonZeroU32::new(u32::try_from(value).unwrap_or(u32::MAX)).unwrap_or(NonZeroU32::MIN)
}
