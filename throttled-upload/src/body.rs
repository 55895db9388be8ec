//! Request bodies that flow through a [`Transport`](crate::Transport).

use crate::reader::RateLimitedReader;
use bytes::{Buf, Bytes};
use std::fmt;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_stream::Stream;

/// An owned, type-erased async byte source.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// The body of an outgoing request.
///
/// A body is either empty, fully buffered, an arbitrary byte source, or a byte source that has
/// been wrapped in a [`RateLimitedReader`] by a [`LimitingTransport`](crate::LimitingTransport).
/// Downstream transports consume it with [`Body::read`] or [`Body::into_stream`] without caring
/// which of these it is.
#[derive(Default)]
pub struct Body {
    kind: Kind,
}

#[derive(Default)]
enum Kind {
    #[default]
    Empty,
    Full(Bytes),
    Reader(BoxReader),
    Throttled(RateLimitedReader),
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            kind: Kind::Reader(Box::pin(reader)),
        }
    }

    pub(crate) fn throttled(reader: RateLimitedReader) -> Self {
        Self {
            kind: Kind::Throttled(reader),
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self.kind, Kind::Throttled(_))
    }

    /// The reader this body is throttled by, if any.
    pub fn throttled_reader(&self) -> Option<&RateLimitedReader> {
        match &self.kind {
            Kind::Throttled(reader) => Some(reader),
            _ => None,
        }
    }

    /// The exact length of the body, when it is known up front.
    pub fn size_hint(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Full(bytes) => Some(bytes.len() as u64),
            Kind::Reader(_) | Kind::Throttled(_) => None,
        }
    }

    /// Returns the buffered contents, or the body itself when it is backed by a reader.
    pub fn into_bytes(self) -> Result<Bytes, Self> {
        match self.kind {
            Kind::Empty => Ok(Bytes::new()),
            Kind::Full(bytes) => Ok(bytes),
            _ => Err(self),
        }
    }

    /// Turns the body into a plain byte source.
    ///
    /// A body that is already throttled is handed back unchanged, since its source belongs to
    /// the reader that wraps it.
    pub(crate) fn into_async_read(self) -> Result<BoxReader, Self> {
        match self.kind {
            Kind::Empty => Ok(Box::pin(tokio::io::empty())),
            Kind::Full(bytes) => Ok(Box::pin(io::Cursor::new(bytes))),
            Kind::Reader(reader) => Ok(reader),
            Kind::Throttled(_) => Err(self),
        }
    }

    /// Reads the next bytes of the body into `buf`, returning `0` at the end.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Empty => Ok(0),
            Kind::Full(bytes) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.advance(n);
                Ok(n)
            }
            Kind::Reader(reader) => reader.read(buf).await,
            Kind::Throttled(reader) => reader.read(buf).await,
        }
    }

    /// Drains the body as a stream of chunks of at most `buffer_size` bytes.
    ///
    /// For a throttled body, `buffer_size` is the read size the rate limiter sees first, and so
    /// becomes its burst capacity.
    pub fn into_stream(
        mut self,
        buffer_size: usize,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let buffer_size = buffer_size.max(1);
        async_stream::try_stream! {
            let mut buf = vec![0; buffer_size];
            loop {
                let n = self.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("Body::Empty"),
            Kind::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Kind::Reader(_) => f.write_str("Body::Reader"),
            Kind::Throttled(reader) => f.debug_tuple("Body::Throttled").field(reader).finish(),
        }
    }
}
