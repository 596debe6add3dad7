//! Byte-level progress reporting for blob transfers
//!
//! Reporting is presentation only: a reporter never influences whether a
//! transfer succeeds.

use crate::logging::Logger;
use crate::store::BlobReader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};

/// Receives progress events keyed by a task id (usually a short digest)
pub trait ProgressReporter: Send + Sync {
    fn start(&self, task_id: &str, total: u64);

    /// `transferred` is the running total for the task
    fn advance(&self, task_id: &str, transferred: u64);

    fn finish(&self, task_id: &str);

    /// The task needed no transfer
    fn skipped(&self, task_id: &str, reason: &str) {
        let _ = (task_id, reason);
    }

    /// The task was started but did not complete
    fn fail(&self, task_id: &str, reason: &str) {
        let _ = (task_id, reason);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self, _: &str, _: u64) {}
    fn advance(&self, _: &str, _: u64) {}
    fn finish(&self, _: &str) {}
}

/// Throttled progress line for one task
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_size: u64,
    start_time: Instant,
    last_update: Instant,
    last_reported: u64,
    operation_name: String,
}

impl ProgressTracker {
    pub fn new(total_size: u64, operation_name: String) -> Self {
        let now = Instant::now();
        Self {
            total_size,
            start_time: now,
            last_update: now,
            last_reported: 0,
            operation_name,
        }
    }

    /// Whether `transferred` is worth a new line: every 5 seconds, every 5%
    /// (capped at 10MB), and on completion
    pub fn should_report(&self, transferred: u64, now: Instant) -> bool {
        let size_threshold = std::cmp::min(10 * 1024 * 1024, self.total_size / 20).max(1);
        now.duration_since(self.last_update) >= Duration::from_secs(5)
            || transferred.saturating_sub(self.last_reported) >= size_threshold
            || transferred >= self.total_size
    }

    pub fn update(&mut self, transferred: u64, output: &Logger) {
        let now = Instant::now();
        if !self.should_report(transferred, now) {
            return;
        }
        let percent = if self.total_size == 0 {
            100
        } else {
            (transferred.min(self.total_size) as f64 / self.total_size as f64 * 100.0) as u8
        };
        output.progress(&format!(
            "{}: {}% ({}/{})",
            self.operation_name,
            percent,
            output.format_size(transferred),
            output.format_size(self.total_size),
        ));
        self.last_update = now;
        self.last_reported = transferred;
    }

    pub fn finish(&self, output: &Logger) {
        output.progress_done();
        let elapsed = self.start_time.elapsed();
        let avg_speed = match elapsed.as_secs() {
            0 => self.total_size,
            secs => self.total_size / secs,
        };
        output.success(&format!(
            "{} completed in {} (avg speed: {})",
            self.operation_name,
            output.format_duration(elapsed),
            output.format_speed(avg_speed)
        ));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Prints progress through a [`Logger`]
#[derive(Debug)]
pub struct LoggerProgress {
    output: Logger,
    trackers: Mutex<HashMap<String, ProgressTracker>>,
}

impl LoggerProgress {
    pub fn new(output: Logger) -> Self {
        Self {
            output,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.trackers.lock().len()
    }
}

impl ProgressReporter for LoggerProgress {
    fn start(&self, task_id: &str, total: u64) {
        self.trackers.lock().insert(
            task_id.to_string(),
            ProgressTracker::new(total, task_id.to_string()),
        );
    }

    fn advance(&self, task_id: &str, transferred: u64) {
        if let Some(tracker) = self.trackers.lock().get_mut(task_id) {
            tracker.update(transferred, &self.output);
        }
    }

    fn finish(&self, task_id: &str) {
        if let Some(tracker) = self.trackers.lock().remove(task_id) {
            tracker.finish(&self.output);
        }
    }

    fn skipped(&self, task_id: &str, reason: &str) {
        self.output.detail(&format!("{}: {}", task_id, reason));
    }

    fn fail(&self, task_id: &str, reason: &str) {
        if self.trackers.lock().remove(task_id).is_some() {
            self.output.progress_done();
        }
        self.output.error(&format!("{}: {}", task_id, reason));
    }
}

/// Reader that reports every chunk it yields
pub struct ProgressReader {
    inner: BlobReader,
    reporter: Arc<dyn ProgressReporter>,
    task_id: String,
    transferred: u64,
}

impl ProgressReader {
    pub fn new(inner: BlobReader, reporter: Arc<dyn ProgressReporter>, task_id: impl Into<String>) -> Self {
        Self {
            inner,
            reporter,
            task_id: task_id.into(),
            transferred: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl AsyncRead for ProgressReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                self.transferred += read;
                self.reporter.advance(&self.task_id, self.transferred);
            }
        }
        poll
    }
}
