//! Shared upload progress record.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A consistent copy of the upload statistics at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    /// Payload bytes read so far, never more than `total_bytes` when that is known.
    pub bytes: u64,
    /// Expected payload size, `0` when unknown.
    pub total_bytes: u64,
    /// Average rate since the first read, in bytes per second.
    pub avg_rate: u64,
    /// Percentage complete, `None` when the total is unknown.
    pub progress: Option<f64>,
    /// Estimated time to completion, `None` when it cannot be computed yet.
    pub time_remaining: Option<Duration>,
    /// Time between the first read and the latest one.
    pub elapsed: Duration,
}

impl Status {
    /// `"42.0%"`, or `"n/a"` when the total size is unknown.
    pub fn progress_label(&self) -> String {
        match self.progress {
            Some(progress) => format!("{progress:.1}%"),
            None => "n/a".to_string(),
        }
    }
}

/// Lock-protected [`Status`] updated by the reader and sampled by reporters.
///
/// Every update recomputes all derived fields under one lock, so a [`StatusMonitor::snapshot`]
/// never mixes values from different reads.
#[derive(Debug, Default)]
pub struct StatusMonitor {
    state: Mutex<MonitorState>,
}

#[derive(Debug, Default)]
struct MonitorState {
    started: Option<Instant>,
    status: Status,
}

impl StatusMonitor {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                started: None,
                status: Status {
                    total_bytes,
                    ..Status::default()
                },
            }),
        }
    }

    /// Records the start of the transfer, unless it has already started.
    pub fn mark_started(&self) {
        self.lock().started.get_or_insert_with(Instant::now);
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.lock().started
    }

    /// Accounts for `n` more bytes read.
    pub fn record_read(&self, n: usize) {
        self.record_read_at(n, Instant::now());
    }

    pub(crate) fn record_read_at(&self, n: usize, now: Instant) {
        let mut state = self.lock();
        let started = *state.started.get_or_insert(now);
        let status = &mut state.status;

        status.bytes = status.bytes.saturating_add(n as u64);
        // multipart framing around the payload is read too; it is not payload progress
        if status.total_bytes > 0 {
            status.bytes = status.bytes.min(status.total_bytes);
        }

        status.elapsed = now.saturating_duration_since(started);
        let secs = status.elapsed.as_secs_f64();
        status.avg_rate = if secs > 0.0 {
            (status.bytes as f64 / secs) as u64
        } else {
            0
        };

        if status.total_bytes > 0 {
            let remaining = status.total_bytes - status.bytes;
            status.progress = Some(status.bytes as f64 / status.total_bytes as f64 * 100.0);
            status.time_remaining = (status.avg_rate > 0)
                .then(|| Duration::from_secs_f64(remaining as f64 / status.avg_rate as f64));
        } else {
            status.progress = None;
            status.time_remaining = None;
        }
    }

    pub fn snapshot(&self) -> Status {
        self.lock().status.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
