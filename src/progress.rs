//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the batch converts each document. Callbacks run on the batch's single
//! aggregator task, never on a worker, so a slow callback delays reporting
//! but not conversion.
//!
//! Callers that prefer a channel can use [`ChannelProgress`], which turns
//! every event into a [`ProgressEvent`] on a tokio unbounded channel.
//!
//! # Example
//!
//! ```rust
//! use md2pdf::{BatchConfig, BatchProgressCallback, ConversionResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_job_complete(&self, result: &ConversionResult, completed: usize, total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", completed, total, result.source.display());
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::output::{BatchSummary, ConversionResult};

/// Called by the batch orchestrator as documents are converted.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `completed` counts finished jobs including this one.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any job is dispatched.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a worker picks up a job.
    ///
    /// # Arguments
    /// * `index`  — the job's position in the batch
    /// * `total`  — jobs in the batch
    /// * `source` — Markdown file being converted
    fn on_job_start(&self, index: usize, total: usize, source: &Path) {
        let _ = (index, total, source);
    }

    /// Called when a job produced its PDF.
    fn on_job_complete(&self, result: &ConversionResult, completed: usize, total: usize) {
        let _ = (result, completed, total);
    }

    /// Called when a job failed, timed out or was cancelled.
    fn on_job_error(&self, result: &ConversionResult, completed: usize, total: usize) {
        let _ = (result, completed, total);
    }

    /// Called once with the finalised summary.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

// ── Channel adapter ──────────────────────────────────────────────────────

/// A batch event as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    BatchStarted {
        total: usize,
    },
    JobStarted {
        index: usize,
        total: usize,
        source: PathBuf,
    },
    JobFinished {
        result: ConversionResult,
        completed: usize,
        total: usize,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Forwards every callback as a [`ProgressEvent`].
///
/// Sending never blocks; events are dropped once the receiver is gone.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// A callback plus the receiver it feeds.
    pub fn channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl BatchProgressCallback for ChannelProgress {
    fn on_batch_start(&self, total: usize) {
        self.send(ProgressEvent::BatchStarted { total });
    }

    fn on_job_start(&self, index: usize, total: usize, source: &Path) {
        self.send(ProgressEvent::JobStarted {
            index,
            total,
            source: source.to_path_buf(),
        });
    }

    fn on_job_complete(&self, result: &ConversionResult, completed: usize, total: usize) {
        self.send(ProgressEvent::JobFinished {
            result: result.clone(),
            completed,
            total,
        });
    }

    fn on_job_error(&self, result: &ConversionResult, completed: usize, total: usize) {
        self.send(ProgressEvent::JobFinished {
            result: result.clone(),
            completed,
            total,
        });
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.send(ProgressEvent::BatchFinished {
            succeeded: summary.succeeded,
            failed: summary.failed,
            cancelled: summary.cancelled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_job_start(&self, _index: usize, _total: usize, _source: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _result: &ConversionResult, _completed: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_error(&self, _result: &ConversionResult, _completed: usize, _total: usize) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn result(ok: bool) -> ConversionResult {
        if ok {
            ConversionResult::success(0, "a.md".into(), "a.pdf".into(), 5)
        } else {
            ConversionResult::failure(1, "b.md".into(), "b.pdf".into(), &JobError::Cancelled, 0)
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_job_start(0, 2, Path::new("a.md"));
        cb.on_job_complete(&result(true), 1, 2);
        cb.on_job_error(&result(false), 2, 2);
        cb.on_batch_complete(&BatchSummary::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };
        tracker.on_job_start(0, 2, Path::new("a.md"));
        tracker.on_job_complete(&result(true), 1, 2);
        tracker.on_job_start(1, 2, Path::new("b.md"));
        tracker.on_job_error(&result(false), 2, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_progress_forwards_events_in_order() {
        let (cb, mut rx) = ChannelProgress::channel();
        cb.on_batch_start(1);
        cb.on_job_complete(&result(true), 1, 1);
        drop(cb);

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::BatchStarted { total: 1 });
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::JobFinished { completed: 1, total: 1, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_progress_survives_dropped_receiver() {
        let (cb, rx) = ChannelProgress::channel();
        drop(rx);
        cb.on_batch_start(3);
    }
}
