//! Batch orchestration: run planned jobs on a fixed pool of workers.
//!
//! ## Shape
//!
//! ```text
//!            ┌─ worker 0 ─┐
//! queue ───▶ ├─ worker 1 ─┤ ──▶ channel ──▶ aggregator ──▶ BatchSummary
//! (jobs)     └─ worker N ─┘   (events)     (counts, progress callbacks)
//! ```
//!
//! Each worker pops a job, converts it on the blocking pool and sends the
//! result down an unbounded channel. Only the aggregator touches the
//! summary or calls progress callbacks, so workers never wait on reporting.
//! Any error or panic inside a job becomes a `Failure` for that job alone.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::{JobError, Md2PdfError};
use crate::job::{plan_batch, ConversionJob};
use crate::output::{BatchSummary, ConversionResult};
use crate::pipeline::input::{enumerate_inputs, load_source};
use crate::pipeline::render::{CommandEngine, CommitGate, RenderAdapter, RenderEngine};
use crate::pipeline::transform::transform;
use crate::progress::{NoopProgressCallback, ProgressCallback};

/// Cooperative cancellation shared between a batch and its caller.
///
/// Workers check it between jobs; a job already rendering finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum WorkerEvent {
    Started { index: usize, source: PathBuf },
    Finished(ConversionResult),
}

/// Runs a list of [`ConversionJob`]s through the pipeline.
///
/// # Example
/// ```rust,no_run
/// use md2pdf::{plan_batch, BatchConfig, BatchRunner, CommandEngine};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BatchConfig::default();
/// let engine = CommandEngine::from_config(&config.engine, config.job_timeout())?;
/// let jobs = plan_batch(&["notes/a.md", "notes/b.md"], &config)?;
/// let summary = BatchRunner::from_config(&config, Arc::new(engine)).run_blocking(jobs)?;
/// println!("{} ok, {} failed", summary.succeeded, summary.failed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BatchRunner {
    adapter: RenderAdapter,
    concurrency: usize,
    job_timeout: Option<Duration>,
    progress: ProgressCallback,
    cancel: CancelFlag,
}

impl BatchRunner {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            adapter: RenderAdapter::new(engine),
            concurrency: num_cpus::get().max(1),
            job_timeout: None,
            progress: Arc::new(NoopProgressCallback),
            cancel: CancelFlag::new(),
        }
    }

    /// Runner with the concurrency, timeout and progress callback of `config`.
    pub fn from_config(config: &BatchConfig, engine: Arc<dyn RenderEngine>) -> Self {
        let mut runner = Self::new(engine)
            .concurrency(config.concurrency)
            .job_timeout(config.job_timeout());
        if let Some(cb) = &config.progress_callback {
            runner = runner.progress(Arc::clone(cb));
        }
        runner
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = cb;
        self
    }

    /// Share an existing cancel flag (e.g. one wired to Ctrl-C).
    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Handle that cancels this runner's batches.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run every job and return the finalised summary.
    ///
    /// Never fails: every job yields exactly one result.
    pub async fn run(&self, jobs: Vec<ConversionJob>) -> BatchSummary {
        self.run_with_sink(jobs, None).await
    }

    /// Synchronous wrapper around [`run`](Self::run).
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn run_blocking(&self, jobs: Vec<ConversionJob>) -> Result<BatchSummary, Md2PdfError> {
        Ok(tokio::runtime::Runtime::new()
            .map_err(|e| Md2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(jobs)))
    }

    /// Like [`run`](Self::run), also forwarding each result to `sink` as it
    /// is recorded.
    pub(crate) async fn run_with_sink(
        &self,
        jobs: Vec<ConversionJob>,
        sink: Option<mpsc::UnboundedSender<ConversionResult>>,
    ) -> BatchSummary {
        let started = Instant::now();
        let total = jobs.len();
        info!(
            "Converting {} documents with {} workers via {}",
            total,
            self.concurrency.min(total.max(1)),
            self.adapter.engine_name()
        );
        self.progress.on_batch_start(total);

        let roster: Vec<(usize, PathBuf, PathBuf)> = jobs
            .iter()
            .map(|j| (j.index, j.source.clone(), j.planned_output()))
            .collect();

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let workers = self.concurrency.min(total).max(1);
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&queue),
                    tx.clone(),
                    self.adapter.clone(),
                    self.cancel.clone(),
                    self.job_timeout,
                ))
            })
            .collect();
        drop(tx);

        let mut summary = BatchSummary::with_capacity(total);
        let mut reported = HashSet::with_capacity(total);

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Started { index, source } => {
                    self.progress.on_job_start(index, total, &source);
                }
                WorkerEvent::Finished(result) => {
                    self.record(&mut summary, &mut reported, result, total, sink.as_ref());
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Batch worker ended abnormally: {}", e);
            }
        }

        // A job whose worker died without reporting still gets a result.
        for (index, source, output) in roster {
            if !reported.contains(&index) {
                let err = JobError::Panicked {
                    detail: "worker stopped before reporting a result".into(),
                };
                let result = ConversionResult::failure(index, source, output, &err, 0);
                self.record(&mut summary, &mut reported, result, total, sink.as_ref());
            }
        }

        summary.finalize(started.elapsed().as_millis() as u64, self.cancel.is_cancelled());
        info!(
            "Batch finished in {}ms: {} succeeded, {} failed{}",
            summary.duration_ms,
            summary.succeeded,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.progress.on_batch_complete(&summary);
        summary
    }

    fn record(
        &self,
        summary: &mut BatchSummary,
        reported: &mut HashSet<usize>,
        result: ConversionResult,
        total: usize,
        sink: Option<&mpsc::UnboundedSender<ConversionResult>>,
    ) {
        if !reported.insert(result.index) {
            warn!("Ignoring duplicate result for job {}", result.index);
            return;
        }
        let completed = summary.total() + 1;
        if result.is_success() {
            self.progress.on_job_complete(&result, completed, total);
        } else {
            self.progress.on_job_error(&result, completed, total);
        }
        if let Some(sink) = sink {
            let _ = sink.send(result.clone());
        }
        summary.record(result);
    }
}

// ── Workers ──────────────────────────────────────────────────────────────

async fn worker_loop(
    worker: usize,
    queue: Arc<Mutex<VecDeque<ConversionJob>>>,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    adapter: RenderAdapter,
    cancel: CancelFlag,
    job_timeout: Option<Duration>,
) {
    let mut processed = 0usize;
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(job) = next else { break };

        if cancel.is_cancelled() {
            let result = ConversionResult::failure(
                job.index,
                job.source.clone(),
                job.planned_output(),
                &JobError::Cancelled,
                0,
            );
            let _ = tx.send(WorkerEvent::Finished(result));
            continue;
        }

        let _ = tx.send(WorkerEvent::Started {
            index: job.index,
            source: job.source.clone(),
        });
        process_job(job, &adapter, job_timeout, &tx).await;
        processed += 1;
    }
    debug!("Worker {} done after {} jobs", worker, processed);
}

/// Convert one job and report its result.
///
/// A timed-out job is reported at once, but the worker keeps its slot until
/// the abandoned render returns, so at most `concurrency` renders run.
async fn process_job(
    job: ConversionJob,
    adapter: &RenderAdapter,
    job_timeout: Option<Duration>,
    tx: &mpsc::UnboundedSender<WorkerEvent>,
) {
    let started = Instant::now();
    let index = job.index;
    let source = job.source.clone();
    let output = job.planned_output();

    let gate = Arc::new(CommitGate::new());
    let mut handle = tokio::task::spawn_blocking({
        let adapter = adapter.clone();
        let gate = Arc::clone(&gate);
        move || convert_one(&job, &adapter, &gate)
    });

    let joined = match job_timeout {
        None => (&mut handle).await,
        Some(limit) => {
            let waited = tokio::time::timeout(limit, &mut handle).await;
            match waited {
                Ok(joined) => joined,
                Err(_) if gate.try_abandon() => {
                    warn!("{} exceeded {}ms; discarding its output", source.display(), limit.as_millis());
                    let err = JobError::Timeout {
                        limit_ms: limit.as_millis() as u64,
                    };
                    let result = ConversionResult::failure(index, source, output, &err, elapsed_ms(started));
                    let _ = tx.send(WorkerEvent::Finished(result));
                    if let Err(e) = handle.await {
                        debug!("Abandoned render ended abnormally: {}", e);
                    }
                    return;
                }
                // Output is already being moved into place; let it finish.
                Err(_) => (&mut handle).await,
            }
        }
    };

    let elapsed = elapsed_ms(started);
    let result = match joined {
        Ok(Ok(artifact)) => {
            debug!("{} → {} in {}ms", source.display(), artifact.display(), elapsed);
            ConversionResult::success(index, source, artifact, elapsed)
        }
        Ok(Err(e)) => {
            warn!("{} failed: {}", source.display(), e);
            ConversionResult::failure(index, source, output, &e, elapsed)
        }
        Err(join_error) => {
            let err = JobError::Panicked {
                detail: panic_detail(join_error),
            };
            warn!("{} failed: {}", source.display(), err);
            ConversionResult::failure(index, source, output, &err, elapsed)
        }
    };
    let _ = tx.send(WorkerEvent::Finished(result));
}

/// Transformer → render adapter for one job. Runs on the blocking pool.
fn convert_one(job: &ConversionJob, adapter: &RenderAdapter, gate: &CommitGate) -> Result<PathBuf, JobError> {
    let destination = job.destination()?;
    let text = load_source(&job.source)?;
    let markup = transform(&text, &job.theme, &job.font, &job.transform_options())?;
    Ok(adapter.render_gated(&markup, &destination, gate)?)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_detail(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Run planned jobs with the engine configured in `config`.
///
/// # Errors
/// Only [`Md2PdfError::EngineUnavailable`], before any job runs. Per-file
/// failures are reported inside the summary.
pub async fn run_batch(jobs: Vec<ConversionJob>, config: &BatchConfig) -> Result<BatchSummary, Md2PdfError> {
    let engine = CommandEngine::from_config(&config.engine, config.job_timeout())?;
    Ok(BatchRunner::from_config(config, Arc::new(engine)).run(jobs).await)
}

/// Synchronous wrapper around [`run_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_batch_blocking(jobs: Vec<ConversionJob>, config: &BatchConfig) -> Result<BatchSummary, Md2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Md2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_batch(jobs, config))
}

/// Enumerate, plan and convert in one call.
///
/// The engine is located before the output directory is created, so a
/// missing engine leaves the file system untouched.
pub async fn convert_paths<P: AsRef<Path>>(inputs: &[P], config: &BatchConfig) -> Result<BatchSummary, Md2PdfError> {
    let sources = enumerate_inputs(inputs)?;
    if sources.is_empty() {
        warn!("No Markdown files found in the given inputs");
        return Ok(BatchSummary::default());
    }
    let engine = CommandEngine::from_config(&config.engine, config.job_timeout())?;
    let jobs = plan_batch(&sources, config)?;
    Ok(BatchRunner::from_config(config, Arc::new(engine)).run(jobs).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobErrorKind, RenderError};
    use crate::pipeline::transform::StructuredMarkup;

    struct PanicEngine;

    impl RenderEngine for PanicEngine {
        fn name(&self) -> &str {
            "panic"
        }
        fn render_to(&self, _: &StructuredMarkup, _: &Path) -> Result<(), RenderError> {
            panic!("engine exploded");
        }
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn empty_batch_completes() {
        let summary = BatchRunner::new(Arc::new(PanicEngine)).run(Vec::new()).await;
        assert_eq!(summary.total(), 0);
        assert!(summary.all_succeeded());
    }

    #[tokio::test]
    async fn engine_panic_becomes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.md");
        std::fs::write(&src, "# A").unwrap();
        let config = BatchConfig::builder()
            .output_root(dir.path().join("out"))
            .build()
            .unwrap();
        let jobs = plan_batch(&[src], &config).unwrap();

        let summary = BatchRunner::new(Arc::new(PanicEngine)).run(jobs).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].error_kind(), Some(JobErrorKind::Panicked));
        match &summary.results[0].outcome {
            crate::output::Outcome::Failure { message, .. } => assert!(message.contains("engine exploded")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn panic_detail_reads_string_payloads() {
        let err = tokio_test::block_on(async {
            tokio::spawn(async { panic!("{}", String::from("boom")) }).await
        })
        .unwrap_err();
        assert_eq!(panic_detail(err), "boom");
    }
}
