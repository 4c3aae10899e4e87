//! Error types for the md2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Md2PdfError`] — **Fatal**: the batch cannot start at all (unknown
//!   theme, unusable output root, missing input, engine not installed).
//!   Returned as `Err(Md2PdfError)` before any job is dispatched.
//!
//! * [`JobError`] — **Non-fatal**: a single document failed (bad encoding,
//!   engine crash, timeout) while every other document in the batch is
//!   unaffected. Converted into a [`crate::output::Outcome::Failure`] at the
//!   worker boundary so the batch always completes with a per-file report.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All fatal errors returned by the md2pdf library.
///
/// Per-document failures use [`JobError`] and are stored in
/// [`crate::output::ConversionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Md2PdfError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Theme identifier is not in the registry.
    #[error("Unknown theme '{id}'. Available themes: {known}")]
    UnknownTheme { id: String, known: String },

    /// The output root exists but is not a directory, or cannot be created.
    #[error("Output directory '{path}' is unusable: {reason}")]
    InvalidOutputRoot { path: PathBuf, reason: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The external rendering engine cannot be found or started.
    #[error(
        "Rendering engine '{engine}' is unavailable: {detail}\n\n\
Install WeasyPrint (e.g. `pip install weasyprint`), or point\n\
MD2PDF_ENGINE_PATH at an existing engine executable."
    )]
    EngineUnavailable { engine: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// A user-supplied input path does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The transformer was called directly and failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Some documents converted but at least one failed.
    ///
    /// Returned by [`crate::output::BatchSummary::into_result`] when the
    /// caller wants to treat any job failure as an error.
    #[error("{failed}/{total} documents failed to convert")]
    PartialFailure { failed: usize, total: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Markdown could not be turned into markup at all.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("Markdown transform failed: {detail}")]
pub struct TransformError {
    pub detail: String,
}

impl TransformError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Classification of a rendering engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderErrorKind {
    /// A font named by the style sheet could not be loaded.
    MissingFont,
    /// The engine rejected the document markup or style sheet.
    InvalidMarkup,
    /// Reading or writing a file failed.
    IoFailure,
    /// Non-zero exit or no usable PDF, with no more specific cause.
    EngineFailure,
    /// The engine executable could not be started.
    EngineUnavailable,
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingFont => "missing font",
            Self::InvalidMarkup => "invalid markup",
            Self::IoFailure => "I/O failure",
            Self::EngineFailure => "engine failure",
            Self::EngineUnavailable => "engine unavailable",
        })
    }
}

/// The rendering engine adapter failed for one document.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub detail: String,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::new(RenderErrorKind::IoFailure, format!("{context}: {err}"))
    }
}

/// A non-fatal error for a single document.
///
/// The batch continues; the error is recorded in that document's result.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum JobError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// With structure preservation on, the source lies outside the base.
    #[error("'{path}' is not inside base directory '{base}'")]
    PathOutsideBase { path: PathBuf, base: PathBuf },

    /// The source path has no file name to derive a PDF name from.
    #[error("'{path}' does not name a file")]
    InvalidSourcePath { path: PathBuf },

    /// Another job in the batch already claimed this destination.
    #[error("Destination '{destination}' is already used by '{claimed_by}'")]
    PathCollision {
        destination: PathBuf,
        claimed_by: PathBuf,
    },

    #[error("Render failed ({0})")]
    Render(#[from] RenderError),

    /// Source bytes are not valid UTF-8.
    #[error("'{path}' is not valid UTF-8 (first invalid byte at offset {offset})")]
    Encoding { path: PathBuf, offset: usize },

    /// Source file could not be read.
    #[error("Failed to read '{path}': {detail}")]
    Read { path: PathBuf, detail: String },

    #[error("Conversion timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("Cancelled before conversion started")]
    Cancelled,

    /// The worker panicked while converting.
    #[error("Conversion aborted unexpectedly: {detail}")]
    Panicked { detail: String },
}

/// Serializable discriminant of [`JobError`], used in results and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Transform,
    PathOutsideBase,
    InvalidSourcePath,
    PathCollision,
    Render(RenderErrorKind),
    Encoding,
    Read,
    Timeout,
    Cancelled,
    Panicked,
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Transform(_) => JobErrorKind::Transform,
            Self::PathOutsideBase { .. } => JobErrorKind::PathOutsideBase,
            Self::InvalidSourcePath { .. } => JobErrorKind::InvalidSourcePath,
            Self::PathCollision { .. } => JobErrorKind::PathCollision,
            Self::Render(e) => JobErrorKind::Render(e.kind),
            Self::Encoding { .. } => JobErrorKind::Encoding,
            Self::Read { .. } => JobErrorKind::Read,
            Self::Timeout { .. } => JobErrorKind::Timeout,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::Panicked { .. } => JobErrorKind::Panicked,
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => f.write_str("transform"),
            Self::PathOutsideBase => f.write_str("path outside base"),
            Self::InvalidSourcePath => f.write_str("invalid source path"),
            Self::PathCollision => f.write_str("path collision"),
            Self::Render(kind) => write!(f, "render: {kind}"),
            Self::Encoding => f.write_str("encoding"),
            Self::Read => f.write_str("read"),
            Self::Timeout => f.write_str("timeout"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Panicked => f.write_str("panicked"),
        }
    }
}
