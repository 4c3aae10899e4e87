//! Configuration types for Markdown-to-PDF batch conversion.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. One struct holds every knob, so a config can be
//! shared across threads and logged as a single value.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Md2PdfError;
use crate::progress::ProgressCallback;

/// Default font family, applied to body text and code alike.
pub const DEFAULT_FONT_FAMILY: &str = "JetBrains Mono";

/// Default font size in points.
pub const DEFAULT_FONT_SIZE_PT: f32 = 11.0;

const FONT_SIZE_RANGE: (f32, f32) = (6.0, 32.0);

/// Configuration for one batch of Markdown-to-PDF conversions.
///
/// Built via [`BatchConfig::builder()`] or using [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use md2pdf::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .theme("dark")
///     .output_root("build/pdf")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Theme identifier, matched case-insensitively. Default: "light".
    pub theme: String,

    /// Font override merged into the theme style sheet.
    pub font: FontConfig,

    /// Directory receiving the PDFs. Created if missing. Default: "pdf".
    pub output_root: PathBuf,

    /// Recreate each source's folder structure under `output_root`. Default: true.
    ///
    /// When off, every PDF lands directly in `output_root`, so two sources
    /// with the same file name collide (the later one fails with
    /// `PathCollision`).
    pub preserve_structure: bool,

    /// Root against which relative output paths are computed.
    ///
    /// `None` with structure preservation on: the common ancestor directory
    /// of all inputs is used.
    pub base_directory: Option<PathBuf>,

    /// Number of documents converted at once. Default: available CPUs.
    pub concurrency: usize,

    /// Upper bound on a single document's conversion, in seconds. Default: none.
    pub job_timeout_secs: Option<u64>,

    /// Prepend the file stem as an `<h1 class="doc-title">`. Default: true.
    pub document_title: bool,

    /// External engine invocation.
    pub engine: EngineCommand,

    /// Receives batch progress notifications.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            font: FontConfig::default(),
            output_root: PathBuf::from("pdf"),
            preserve_structure: true,
            base_directory: None,
            concurrency: num_cpus::get().max(1),
            job_timeout_secs: None,
            document_title: true,
            engine: EngineCommand::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("theme", &self.theme)
            .field("font", &self.font)
            .field("output_root", &self.output_root)
            .field("preserve_structure", &self.preserve_structure)
            .field("base_directory", &self.base_directory)
            .field("concurrency", &self.concurrency)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("document_title", &self.document_title)
            .field("engine", &self.engine)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn theme(mut self, id: impl Into<String>) -> Self {
        self.config.theme = id.into();
        self
    }

    pub fn font_family(mut self, family: impl Into<String>) -> Self {
        self.config.font.family = family.into();
        self
    }

    pub fn font_size(mut self, pt: f32) -> Self {
        self.config.font.size_pt = pt;
        self
    }

    pub fn output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_root = path.into();
        self
    }

    pub fn preserve_structure(mut self, v: bool) -> Self {
        self.config.preserve_structure = v;
        self
    }

    pub fn base_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_directory = Some(path.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = Some(secs);
        self
    }

    pub fn document_title(mut self, v: bool) -> Self {
        self.config.document_title = v;
        self
    }

    pub fn engine(mut self, engine: EngineCommand) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<BatchConfig, Md2PdfError> {
        crate::theme::get_theme(&self.config.theme)?;

        let c = &mut self.config;
        if c.output_root.as_os_str().is_empty() {
            return Err(Md2PdfError::InvalidConfig(
                "Output directory must not be empty".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(Md2PdfError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.job_timeout_secs == Some(0) {
            return Err(Md2PdfError::InvalidConfig(
                "Job timeout must be at least 1 second".into(),
            ));
        }
        if c.engine.program.trim().is_empty() {
            return Err(Md2PdfError::InvalidConfig(
                "Engine program must not be empty".into(),
            ));
        }
        if c.font.family.trim().is_empty() {
            return Err(Md2PdfError::InvalidConfig(
                "Font family must not be empty".into(),
            ));
        }
        if !c.font.size_pt.is_finite() {
            return Err(Md2PdfError::InvalidConfig(format!(
                "Font size must be a number, got {}",
                c.font.size_pt
            )));
        }
        c.font.size_pt = c.font.size_pt.clamp(FONT_SIZE_RANGE.0, FONT_SIZE_RANGE.1);
        Ok(self.config)
    }
}

// ── Font override ────────────────────────────────────────────────────────

/// Font settings merged into the style sheet at assembly time.
///
/// Never mutates the theme; [`FontConfig::to_css`] is appended after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontConfig {
    pub family: String,
    pub size_pt: f32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            family: DEFAULT_FONT_FAMILY.to_string(),
            size_pt: DEFAULT_FONT_SIZE_PT,
        }
    }
}

impl FontConfig {
    pub fn new(family: impl Into<String>, size_pt: f32) -> Self {
        Self {
            family: family.into(),
            size_pt,
        }
    }

    /// Family name with characters that could escape a CSS string removed.
    pub fn sanitized_family(&self) -> String {
        let cleaned: String = self
            .family
            .chars()
            .filter(|c| !matches!(c, '\'' | '"' | '\\' | '{' | '}' | ';' | '<' | '>'))
            .filter(|c| !c.is_control())
            .collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            DEFAULT_FONT_FAMILY.to_string()
        } else {
            cleaned.to_string()
        }
    }

    pub fn clamped_size(&self) -> f32 {
        if self.size_pt.is_finite() {
            self.size_pt.clamp(FONT_SIZE_RANGE.0, FONT_SIZE_RANGE.1)
        } else {
            DEFAULT_FONT_SIZE_PT
        }
    }

    /// CSS rules overriding the theme's text and code fonts.
    pub fn to_css(&self) -> String {
        let family = self.sanitized_family();
        let size = self.clamped_size();
        format!(
            "/* font override */\n\
html, body {{\n  font-family: '{family}', 'JetBrains Mono', system-ui, -apple-system, 'Segoe UI', Roboto, 'DejaVu Sans', Arial, sans-serif;\n  font-size: {size}pt;\n}}\n\
code, pre, kbd {{\n  font-family: '{family}', 'JetBrains Mono', ui-monospace, SFMono-Regular, Menlo, Consolas, 'DejaVu Sans Mono', monospace;\n}}\n"
        )
    }
}

// ── Engine command ───────────────────────────────────────────────────────

/// Placeholder replaced with the scratch HTML file path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced with the scratch PDF file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced with the source document's directory.
pub const BASE_URL_PLACEHOLDER: &str = "{base_url}";

/// How to invoke the external HTML-to-PDF engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    /// Executable name or path. Default: `weasyprint`.
    pub program: String,
    /// Argument template using `{input}`, `{output}` and `{base_url}`.
    pub args: Vec<String>,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: engine_locate::DEFAULT_ENGINE.to_string(),
            args: vec![
                "--base-url".into(),
                BASE_URL_PLACEHOLDER.into(),
                INPUT_PLACEHOLDER.into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
        }
    }
}

impl EngineCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}
