//! Pull and push orchestration between a registry and local stores
//!
//! Both directions walk a manifest tree: indexes recurse into their children
//! first and are written last, image manifests move their config and layers
//! before the manifest itself. Blobs already present at the destination are
//! never transferred again.

mod pull;
mod push;

use crate::error::Result;
use crate::logging::Logger;
use crate::progress::{LoggerProgress, NoProgress, ProgressReader, ProgressReporter};
use crate::store::BlobReader;
use std::sync::Arc;

/// What happened to one blob during a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOutcome {
    AlreadyPresent,
    Transferred,
}

/// Running totals for one pull or push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub blobs_transferred: usize,
    pub blobs_skipped: usize,
    pub bytes_transferred: u64,
    pub manifests_written: usize,
}

impl TransferStats {
    fn record(&mut self, outcome: BlobOutcome, size: u64) {
        match outcome {
            BlobOutcome::AlreadyPresent => self.blobs_skipped += 1,
            BlobOutcome::Transferred => {
                self.blobs_transferred += 1;
                self.bytes_transferred += size;
            }
        }
    }
}

pub struct TransferEngine {
    output: Logger,
    progress: Arc<dyn ProgressReporter>,
}

impl TransferEngine {
    /// Engine that prints per-blob progress through `output`
    pub fn new(output: Logger) -> Self {
        let progress = Arc::new(LoggerProgress::new(output.clone()));
        Self { output, progress }
    }

    /// Engine that prints nothing
    pub fn quiet() -> Self {
        Self {
            output: Logger::new_quiet(),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    fn track(&self, reader: BlobReader, task_id: &str, size: u64) -> BlobReader {
        self.progress.start(task_id, size);
        Box::new(ProgressReader::new(reader, self.progress.clone(), task_id))
    }

    /// Close out a tracked task, whichever way it ended
    fn settle<T>(&self, task_id: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.progress.finish(task_id),
            Err(err) => self.progress.fail(task_id, &err.to_string()),
        }
        result
    }

    fn report_stats(&self, operation: &str, stats: &TransferStats) {
        self.output.summary_kv(
            operation,
            &[
                ("Blobs transferred", stats.blobs_transferred.to_string()),
                ("Blobs already present", stats.blobs_skipped.to_string()),
                ("Bytes transferred", self.output.format_size(stats.bytes_transferred)),
                ("Manifests written", stats.manifests_written.to_string()),
                ("Elapsed", self.output.format_duration(self.output.elapsed())),
            ],
        );
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::quiet()
    }
}
