//! Bandwidth-capped, observable HTTP uploads.
//!
//! The centre of this crate is [`LimitingTransport`], a [`Transport`] decorator. When a request
//! carrying the upload payload passes through it, the request body is wrapped in a
//! [`RateLimitedReader`]. That reader:
//!
//! - only throttles while the configured daily [`TimeWindow`] is active (or always, without one),
//! - charges every read against a [`TokenBucket`] refilling at the configured rate,
//! - counts every read in a [`StatusMonitor`] that a [`ProgressReporter`] samples concurrently.
//!
//! Resumable uploads send the payload over several requests. The transport keeps a single reader
//! for all of them and swaps each new body into it, so the rate limit and the progress figures
//! cover the upload as a whole.
//!
//! ```no_run
//! use std::sync::Arc;
//! use throttled_upload::{LimitConfig, LimitingTransport, ReqwestTransport, UploadTarget, Uploader};
//!
//! # async fn example() -> eyre::Result<()> {
//! let (payload, size) = throttled_upload::source::open("video.mp4").await?;
//! let config = LimitConfig::new(size, 8_000).limit_between("09:00-17:00", "%H:%M")?;
//! let transport = Arc::new(LimitingTransport::new(
//!     ReqwestTransport::new(reqwest::Client::new()),
//!     config,
//! ));
//! let target = UploadTarget::new("https://upload.example.com/v1/media".parse()?);
//! Uploader::new(Arc::clone(&transport), target)
//!     .upload(payload, size)
//!     .await?;
//! println!("{:?}", transport.monitor_status());
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod bucket;
pub mod config;
pub mod error;
pub mod monitor;
pub mod progress;
pub mod reader;
pub mod source;
pub mod transport;
pub mod upload;
pub mod window;

pub use body::Body;
pub use bucket::TokenBucket;
pub use config::LimitConfig;
pub use error::LimitError;
pub use monitor::{Status, StatusMonitor};
pub use progress::ProgressReporter;
pub use reader::RateLimitedReader;
pub use transport::{LimitingTransport, MediaPayload, ReqwestTransport, Transport};
pub use upload::{UploadTarget, Uploader};
pub use window::TimeWindow;
