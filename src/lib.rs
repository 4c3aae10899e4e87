//! # md2pdf
//!
//! Batch-convert trees of Markdown notes into themed PDF documents.
//!
//! Markdown (CommonMark + GFM, Obsidian callouts, fenced code) is turned into
//! a styled HTML document here; layout and pagination are delegated to an
//! external engine (WeasyPrint by default). Documents convert concurrently
//! on a fixed worker pool, and one bad file never aborts the batch.
//!
//! ## Pipeline Overview
//!
//! ```text
//! paths
//!  │
//!  ├─ 1. Input      walk directories, keep .md/.markdown, skip hidden
//!  ├─ 2. Plan       theme, base directory, destinations, collisions
//!  ├─ 3. Transform  callouts → comrak → highlighted code → themed HTML
//!  ├─ 4. Render     external engine into a scratch file (spawn_blocking)
//!  └─ 5. Publish    %PDF check, atomic rename into the output tree
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2pdf::{convert_paths, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .theme("dark")
//!         .output_root("pdf")
//!         .build()?;
//!     let summary = convert_paths(&["notes/"], &config).await?;
//!     eprintln!("{} converted, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! md2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;
pub mod theme;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{convert_paths, run_batch, run_batch_blocking, BatchRunner, CancelFlag};
pub use config::{BatchConfig, BatchConfigBuilder, EngineCommand, FontConfig};
pub use error::{JobError, JobErrorKind, Md2PdfError, RenderError, RenderErrorKind, TransformError};
pub use job::{plan_batch, ConversionJob};
pub use output::{BatchSummary, ConversionResult, Outcome};
pub use pipeline::callout::{find_callouts, CalloutBlock, CalloutKind};
pub use pipeline::input::{enumerate_inputs, load_source};
pub use pipeline::paths::resolve as resolve_output_path;
pub use pipeline::render::{CommandEngine, RenderAdapter, RenderEngine};
pub use pipeline::transform::{transform, StructuredMarkup, TransformOptions};
pub use progress::{BatchProgressCallback, ChannelProgress, NoopProgressCallback, ProgressCallback, ProgressEvent};
pub use stream::{convert_stream, run_batch_stream, ResultStream};
pub use theme::{get_theme, Theme, ThemeId, ThemeRegistry};
