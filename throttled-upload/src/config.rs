//! Settings for one rate-limited upload.

use crate::error::LimitError;
use crate::window::TimeWindow;
use tokio_util::sync::CancellationToken;

/// Clock-time format used by `--limit-between` unless told otherwise.
pub const DEFAULT_CLOCK_FORMAT: &str = "%H:%M";

/// How a [`LimitingTransport`](crate::LimitingTransport) throttles and accounts for its upload.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Cap in kilobits per second; `0` means unlimited.
    pub rate_limit_kbps: u32,
    /// When the cap applies. `None` means always.
    pub window: Option<TimeWindow>,
    /// Expected payload size in bytes, `0` when unknown.
    pub file_size: u64,
    /// Also treat requests as payload-carrying based on their content type headers.
    pub sniff_content_type: bool,
    /// Cancels rate-limit waits of payload requests that do not bring their own token.
    pub cancel: CancellationToken,
}

impl LimitConfig {
    pub fn new(file_size: u64, rate_limit_kbps: u32) -> Self {
        Self {
            rate_limit_kbps,
            window: None,
            file_size,
            sniff_content_type: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Restricts the cap to the daily window `range`, such as `"22:00-06:00"`.
    pub fn limit_between(mut self, range: &str, clock_format: &str) -> Result<Self, LimitError> {
        self.window = Some(TimeWindow::parse(range, clock_format)?);
        Ok(self)
    }

    pub fn sniff_content_type(mut self, yes: bool) -> Self {
        self.sniff_content_type = yes;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
