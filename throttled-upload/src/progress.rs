//! Console rendering of upload progress.

use crate::monitor::{Status, StatusMonitor};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Formats a status line such as
/// `Progress:     4.00 Mbps, 500000 / 1000000 (50.0%) ETA       1s`.
///
/// Rates of at least 1 Mbps (125 000 bytes per second) are shown in Mbps, slower ones in Kbps.
pub fn render(status: &Status) -> String {
    let rate = status.avg_rate as f64;
    let (rate, unit) = if rate >= 125_000.0 {
        (rate / 125_000.0, "Mbps")
    } else {
        (rate / 125.0, "Kbps")
    };
    format!(
        "Progress: {rate:8.2} {unit}, {} / {} ({}) ETA {:>8}",
        status.bytes,
        status.total_bytes,
        status.progress_label(),
        format_eta(status.time_remaining),
    )
}

/// `1h2m3s`, `4m5s`, `6s`, or `n/a`.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "n/a".to_string();
    };
    let secs = eta.as_secs_f64().round() as u64;
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Periodically prints the state of a [`StatusMonitor`].
///
/// Normally a single line is rewritten in place every interval. In quiet mode there are no
/// periodic updates; a line is printed only when asked for through the `report_now` channel of
/// [`ProgressReporter::run`] (wired to `SIGUSR1` by [`report_on_signal`]).
pub struct ProgressReporter<W = io::Stdout> {
    monitor: Arc<StatusMonitor>,
    interval: Duration,
    quiet: bool,
    out: W,
    erase: usize,
    pending_line: bool,
}

impl ProgressReporter {
    pub fn new(monitor: Arc<StatusMonitor>) -> Self {
        Self::with_output(monitor, io::stdout())
    }
}

impl<W: Write> ProgressReporter<W> {
    pub fn with_output(monitor: Arc<StatusMonitor>, out: W) -> Self {
        Self {
            monitor,
            interval: Duration::from_secs(1),
            quiet: false,
            out,
            erase: 0,
            pending_line: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Time between updates. Zero is treated as one millisecond.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Prints the current status, unless no upload has started reading yet.
    pub fn report(&mut self) {
        if let Err(error) = self.write_status() {
            tracing::warn!(%error, "failed to write progress");
        }
    }

    fn write_status(&mut self) -> io::Result<()> {
        if self.monitor.started_at().is_none() {
            return Ok(());
        }

        let line = render(&self.monitor.snapshot());
        if self.quiet {
            writeln!(self.out, "{line}")?;
        } else {
            write!(self.out, "\r{:erase$}\r{line}", "", erase = self.erase)?;
            self.erase = line.len();
            self.pending_line = true;
        }
        self.out.flush()
    }

    /// Reports on every tick and every `report_now` message until `shutdown` fires, then ends
    /// any line left open and returns the writer.
    pub async fn run(mut self, mut report_now: mpsc::Receiver<()>, shutdown: CancellationToken) -> W {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signals_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick(), if !self.quiet => self.report(),
                signal = report_now.recv(), if signals_open => match signal {
                    Some(()) => self.report(),
                    None => signals_open = false,
                },
            }
        }

        if self.pending_line {
            if let Err(error) = writeln!(self.out).and_then(|()| self.out.flush()) {
                tracing::warn!(%error, "failed to finish progress line");
            }
        }
        self.out
    }
}

/// A channel that receives a message every time the process gets `SIGUSR1`.
///
/// On platforms without that signal the channel never receives anything.
#[cfg(unix)]
pub fn report_on_signal() -> eyre::Result<mpsc::Receiver<()>> {
    use eyre::Context;
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1()).context("listen for SIGUSR1")?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(not(unix))]
pub fn report_on_signal() -> eyre::Result<mpsc::Receiver<()>> {
    let (_, rx) = mpsc::channel(1);
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    fn status(bytes: u64, total_bytes: u64, avg_rate: u64) -> Status {
        let monitor = StatusMonitor::new(total_bytes);
        let t0 = std::time::Instant::now();
        monitor.record_read_at(0, t0);
        let secs = if avg_rate > 0 { bytes / avg_rate } else { 0 };
        monitor.record_read_at(bytes as usize, t0 + Duration::from_secs(secs));
        monitor.snapshot()
    }

    #[test]
    fn renders_megabits() {
        assert_snapshot!(
            render(&status(5_000_000, 10_000_000, 500_000)),
            @"Progress:     4.00 Mbps, 5000000 / 10000000 (50.0%) ETA      10s"
        );
    }

    #[test]
    fn renders_kilobits() {
        assert_snapshot!(
            render(&status(100_000, 1_000_000, 10_000)),
            @"Progress:    80.00 Kbps, 100000 / 1000000 (10.0%) ETA    1m30s"
        );
    }

    #[test]
    fn renders_unknown_total() {
        assert_snapshot!(
            render(&status(3_000, 0, 1_000)),
            @"Progress:     8.00 Kbps, 3000 / 0 (n/a) ETA      n/a"
        );
        assert_snapshot!(
            render(&Status::default()),
            @"Progress:     0.00 Kbps, 0 / 0 (n/a) ETA      n/a"
        );
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(None), "n/a");
        assert_eq!(format_eta(Some(Duration::ZERO)), "0s");
        assert_eq!(format_eta(Some(Duration::from_millis(4_600))), "5s");
        assert_eq!(format_eta(Some(Duration::from_secs(245))), "4m5s");
        assert_eq!(format_eta(Some(Duration::from_secs(3_723))), "1h2m3s");
        assert_eq!(format_eta(Some(Duration::from_secs(7_200))), "2h0m0s");
    }

    fn started(total: u64, bytes: usize) -> Arc<StatusMonitor> {
        let monitor = Arc::new(StatusMonitor::new(total));
        monitor.record_read(bytes);
        monitor
    }

    #[test]
    fn nothing_before_the_upload_starts() {
        let mut reporter = ProgressReporter::with_output(Arc::new(StatusMonitor::new(10)), Vec::new());
        reporter.report();
        assert!(reporter.out.is_empty());
    }

    #[test]
    fn quiet_reports_are_lines() {
        let mut reporter = ProgressReporter::with_output(started(0, 42), Vec::new()).quiet(true);
        reporter.report();
        reporter.report();

        let out = String::from_utf8(reporter.out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(out.ends_with('\n'));
        assert!(lines[0].starts_with("Progress:"), "{out:?}");
        assert!(lines[0].contains("42 / 0 (n/a)"), "{out:?}");
    }

    #[test]
    fn interactive_reports_overwrite() {
        let mut reporter = ProgressReporter::with_output(started(0, 42), Vec::new());
        reporter.report();
        let first = String::from_utf8(reporter.out.clone()).unwrap();
        let line = first.trim_start_matches('\r').to_string();
        assert_eq!(first, format!("\r\r{line}"));

        reporter.report();
        let out = String::from_utf8(reporter.out).unwrap();
        let second = &out[first.len()..];
        assert_eq!(second, format!("\r{}\r{line}", " ".repeat(line.len())));
    }

    #[tokio::test]
    async fn run_ticks_and_finishes_line() {
        let reporter = ProgressReporter::with_output(started(100, 50), Vec::new())
            .interval(Duration::from_millis(10));
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(reporter.run(rx, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        let out = String::from_utf8(task.await.unwrap()).unwrap();

        assert!(out.matches("Progress:").count() >= 2, "{out:?}");
        assert!(out.contains("50 / 100 (50.0%)"), "{out:?}");
        assert!(out.ends_with('\n'));
        assert_eq!(out.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn quiet_run_reports_on_demand_only() {
        let reporter = ProgressReporter::with_output(started(100, 50), Vec::new())
            .quiet(true)
            .interval(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(reporter.run(rx, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).await.unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let out = String::from_utf8(task.await.unwrap()).unwrap();

        assert_eq!(out.lines().count(), 1, "{out:?}");
        assert!(out.ends_with('\n'));
    }
}
