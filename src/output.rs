//! Result types: one [`ConversionResult`] per job, gathered into a
//! [`BatchSummary`].
//!
//! Everything here is `Serialize` so the CLI can print a batch report with
//! `--json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobErrorKind, Md2PdfError};

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { artifact: PathBuf },
    Failure { kind: JobErrorKind, message: String },
}

/// The outcome of converting one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Position of the job in the planned batch.
    pub index: usize,
    pub source: PathBuf,
    /// Planned destination, whether or not it was written.
    pub output: PathBuf,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

impl ConversionResult {
    pub fn success(index: usize, source: PathBuf, artifact: PathBuf, duration_ms: u64) -> Self {
        Self {
            index,
            source,
            output: artifact.clone(),
            outcome: Outcome::Success { artifact },
            duration_ms,
        }
    }

    pub fn failure(
        index: usize,
        source: PathBuf,
        output: PathBuf,
        error: &JobError,
        duration_ms: u64,
    ) -> Self {
        Self {
            index,
            source,
            output,
            outcome: Outcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
            },
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<JobErrorKind> {
        match &self.outcome {
            Outcome::Failure { kind, .. } => Some(*kind),
            Outcome::Success { .. } => None,
        }
    }

    /// The written PDF, for successful jobs.
    pub fn artifact(&self) -> Option<&Path> {
        match &self.outcome {
            Outcome::Success { artifact } => Some(artifact),
            Outcome::Failure { .. } => None,
        }
    }
}

/// Aggregate of every job in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Sorted by job index once the batch is finalised.
    pub results: Vec<ConversionResult>,
    /// Cancellation was requested while the batch ran.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn with_capacity(jobs: usize) -> Self {
        Self {
            results: Vec::with_capacity(jobs),
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Append one result, keeping the counts consistent.
    pub fn record(&mut self, result: ConversionResult) {
        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    /// Put results in job order and stamp the total duration.
    pub fn finalize(&mut self, duration_ms: u64, cancelled: bool) {
        self.results.sort_by_key(|r| r.index);
        self.duration_ms = duration_ms;
        self.cancelled = cancelled;
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// `Err(PartialFailure)` if any job failed.
    pub fn into_result(self) -> Result<Self, Md2PdfError> {
        if self.failed > 0 {
            return Err(Md2PdfError::PartialFailure {
                failed: self.failed,
                total: self.total(),
            });
        }
        Ok(self)
    }
}
