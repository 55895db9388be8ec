use clap::Parser;
use eyre::Context;
use http::{HeaderName, HeaderValue, Method, Uri};
use std::io::IsTerminal;
use std::sync::Arc;
use throttled_upload::config::DEFAULT_CLOCK_FORMAT;
use throttled_upload::transport::DEFAULT_READ_BUFFER_SIZE;
use throttled_upload::{
    LimitConfig, LimitingTransport, ProgressReporter, ReqwestTransport, TimeWindow, UploadTarget,
    Uploader, progress, source,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Upload a file to an HTTP endpoint with a bandwidth cap.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// File to upload: a path, an http(s) URL, or `-` for stdin
    #[arg(long)]
    filename: String,

    /// Endpoint to upload to
    #[arg(long)]
    url: Uri,

    /// HTTP method of the upload requests
    #[arg(long, default_value = "PUT")]
    method: Method,

    /// Content type of the payload
    #[arg(long, default_value = "application/octet-stream")]
    content_type: HeaderValue,

    /// Rate limit in kilobits per second, 0 for no limit
    #[arg(long, default_value_t = 0)]
    ratelimit: u32,

    /// Only apply the rate limit between these times each day, e.g. 10:00-16:00
    #[arg(long)]
    limit_between: Option<String>,

    /// strftime format of the times in --limit-between
    #[arg(long, default_value = DEFAULT_CLOCK_FORMAT)]
    clock_format: String,

    /// Send the payload in requests of this many bytes, 0 for a single request
    #[arg(long, default_value_t = 0)]
    chunksize: usize,

    /// Bytes per read from the payload; also the burst size of the rate limiter
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    buffer_size: usize,

    /// Extra request header as NAME:VALUE, may be repeated
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Only print progress when sent SIGUSR1
    #[arg(long)]
    quiet: bool,

    /// Log requests and responses
    #[arg(long)]
    debug: bool,
}

fn parse_header(s: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("{s:?} is not of the form NAME:VALUE"))?;
    let name = name.trim().parse().map_err(|e| format!("{name:?}: {e}"))?;
    let value = value.trim().parse().map_err(|e| format!("{value:?}: {e}"))?;
    Ok((name, value))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    // bad windows should fail before anything is opened or sent
    let window = args
        .limit_between
        .as_deref()
        .map(|range| TimeWindow::parse(range, &args.clock_format))
        .transpose()
        .context("parse --limit-between")?;

    let (payload, size) = source::open(&args.filename)
        .await
        .context("open payload")?;

    let cancel = CancellationToken::new();
    let mut config = LimitConfig::new(size, args.ratelimit).with_cancellation(cancel.clone());
    config.window = window;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("build http client")?;
    let transport = Arc::new(LimitingTransport::new(
        ReqwestTransport::new(client).with_read_buffer_size(args.buffer_size),
        config,
    ));

    let shutdown = CancellationToken::new();
    let reporter = ProgressReporter::new(transport.monitor()).quiet(args.quiet);
    let report_now = progress::report_on_signal()?;
    let reporter = tokio::spawn(reporter.run(report_now, shutdown.clone()));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling upload");
                cancel.cancel();
            }
        }
    });

    let mut target = UploadTarget::new(args.url)
        .with_method(args.method)
        .with_content_type(args.content_type)
        .with_chunk_size(args.chunksize);
    for (name, value) in args.headers {
        target = target.with_header(name, value);
    }
    let uploader = Uploader::new(Arc::clone(&transport), target).with_cancellation(cancel.clone());

    let result = tokio::select! {
        result = uploader.upload(payload, size) => result,
        _ = cancel.cancelled() => Err(eyre::eyre!("upload cancelled")),
    };

    shutdown.cancel();
    reporter.await.context("progress reporter")?;

    let response = result?;
    let status = transport.monitor_status();
    tracing::info!(
        bytes = status.bytes,
        elapsed = ?status.elapsed,
        http_status = %response.status(),
        "upload finished"
    );
    tracing::debug!(body = %String::from_utf8_lossy(response.body()), "final response");
    println!("Upload successful!");

    Ok(())
}
