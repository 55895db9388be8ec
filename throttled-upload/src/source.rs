//! Opening the payload to upload.

use crate::body::Body;
use eyre::Context;
use std::io;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

/// Opens `location` for reading and returns it along with its size in bytes.
///
/// `location` is one of:
///
/// - `-`, for standard input (size unknown, reported as `0`),
/// - an `http://` or `https://` URL, downloaded as it is read (size from `Content-Length`, `0`
///   when the server does not say),
/// - a local file path.
pub async fn open(location: &str) -> eyre::Result<(Body, u64)> {
    open_with(&reqwest::Client::new(), location).await
}

/// Like [`open`], downloading URLs with `client`.
pub async fn open_with(client: &reqwest::Client, location: &str) -> eyre::Result<(Body, u64)> {
    if location == "-" {
        return Ok((Body::from_reader(tokio::io::stdin()), 0));
    }

    if location.starts_with("http://") || location.starts_with("https://") {
        let response = client
            .get(location)
            .send()
            .await
            .wrap_err_with(|| format!("request {location}"))?
            .error_for_status()
            .wrap_err_with(|| format!("fetch {location}"))?;
        let size = response.content_length().unwrap_or(0);
        let stream = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
        tracing::debug!(location, size, "streaming payload from url");
        return Ok((Body::from_reader(StreamReader::new(stream)), size));
    }

    let file = tokio::fs::File::open(location)
        .await
        .wrap_err_with(|| format!("open {location}"))?;
    let size = file
        .metadata()
        .await
        .wrap_err_with(|| format!("stat {location}"))?
        .len();
    tracing::debug!(location, size, "opened payload file");
    Ok((Body::from_reader(file), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn local_file() {
        let path = std::env::temp_dir().join(format!("throttled-upload-{}.bin", std::process::id()));
        tokio::fs::write(&path, b"some media bytes").await.unwrap();

        let (mut body, size) = open(path.to_str().unwrap()).await.unwrap();
        assert_eq!(size, 16);
        let mut buf = [0; 64];
        let n = body.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"some media bytes");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn stdin_has_unknown_size() {
        let (body, size) = open("-").await.unwrap();
        assert_eq!(size, 0);
        assert_eq!(body.size_hint(), None);
    }

    #[tokio::test]
    async fn missing_file() {
        let err = open("/definitely/not/here.mp4").await.unwrap_err();
        assert_eq!(err.to_string(), "open /definitely/not/here.mp4");
    }
}
