//! Streaming batch API: yield results as documents finish.
//!
//! [`crate::batch::BatchRunner::run`] returns only after every job is done.
//! [`run_batch_stream`] instead yields each [`ConversionResult`] as soon as
//! the aggregator records it, so callers can report or upload PDFs while
//! the rest of the batch is still converting. Results arrive in completion
//! order; sort by `index` if order matters.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use futures::future;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::info;

use crate::batch::BatchRunner;
use crate::config::BatchConfig;
use crate::error::Md2PdfError;
use crate::job::{plan_batch, ConversionJob};
use crate::output::ConversionResult;
use crate::pipeline::input::enumerate_inputs;
use crate::pipeline::render::CommandEngine;

/// A boxed stream of per-document results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ConversionResult> + Send>>;

/// Run `jobs` in the background and stream their results.
///
/// Must be called from within a tokio runtime. The batch keeps running if
/// the stream is dropped; cancel it through the runner's
/// [`cancel_handle`](BatchRunner::cancel_handle).
pub fn run_batch_stream(runner: BatchRunner, jobs: Vec<ConversionJob>) -> ResultStream {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        runner.run_with_sink(jobs, Some(tx)).await;
    });
    Box::pin(UnboundedReceiverStream::new(rx))
}

/// Enumerate and plan `inputs`, then stream results with the configured engine.
///
/// # Errors
/// Fatal errors only (missing input, unknown theme, engine unavailable).
pub async fn convert_stream<P: AsRef<Path>>(
    inputs: &[P],
    config: &BatchConfig,
) -> Result<ResultStream, Md2PdfError> {
    let sources = enumerate_inputs(inputs)?;
    let engine = CommandEngine::from_config(&config.engine, config.job_timeout())?;
    let jobs = plan_batch(&sources, config)?;
    info!("Streaming conversion of {} documents", jobs.len());
    Ok(run_batch_stream(
        BatchRunner::from_config(config, Arc::new(engine)),
        jobs,
    ))
}

/// Only the failed results of a stream.
pub fn failures_only(stream: ResultStream) -> ResultStream {
    Box::pin(stream.filter(|r| future::ready(!r.is_success())))
}
