//! Errors raised by the rate-limiting core.
//!
//! Everything above the reader (transports, the uploader, the binary) reports failures through
//! `eyre`; this enum exists so callers can tell configuration mistakes and cancelled waits apart
//! from plain I/O failures.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// The time window is not two clock times separated by a single hyphen.
    #[error("time window {0:?} should have 2 parts separated by a hyphen")]
    WindowFormat(String),

    /// One end of the time window does not match the clock format.
    #[error("time window {which} time {input:?} is invalid")]
    WindowTime {
        which: &'static str,
        input: String,
        #[source]
        source: jiff::Error,
    },

    /// A parsed clock time could not be placed on the calendar.
    #[error("could not anchor time window to a calendar day")]
    WindowAnchor(#[source] jiff::Error),

    /// A token bucket wait was interrupted before enough tokens accumulated.
    #[error("rate limit wait cancelled")]
    Cancelled,

    /// More tokens were requested than the bucket can ever hold.
    #[error("requested {requested} tokens from a bucket holding at most {capacity}")]
    Capacity { requested: usize, capacity: u32 },

    /// The reader was read from while no byte source was attached.
    #[error("rate-limited reader has no attached byte source")]
    Detached,
}

impl LimitError {
    /// Recovers a `LimitError` that travelled up a read path inside an [`io::Error`].
    pub fn from_io(err: &io::Error) -> Option<&LimitError> {
        err.get_ref()?.downcast_ref()
    }
}

impl From<LimitError> for io::Error {
    fn from(err: LimitError) -> Self {
        io::Error::other(err)
    }
}
