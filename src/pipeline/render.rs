//! PDF rendering: hand the HTML document to a layout engine and move the
//! result into place atomically.
//!
//! ## Atomicity
//!
//! The engine never writes the destination directly. [`RenderAdapter`]
//! creates a scratch file (`.md2pdf-XXXX.pdf.part`) next to the destination,
//! lets the engine fill it, checks the `%PDF` header and then renames it over
//! the destination. A failed or crashed render leaves the destination either
//! absent or with its previous content; the scratch file is deleted on drop.
//!
//! ## Blocking
//!
//! Engines block on a child process, so callers run them in
//! `spawn_blocking`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::paths::prepare_destination;
use super::transform::StructuredMarkup;
use crate::config::{EngineCommand, BASE_URL_PLACEHOLDER, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
use crate::error::{Md2PdfError, RenderError, RenderErrorKind};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Something that lays out an HTML document as PDF.
pub trait RenderEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Write a PDF for `markup` to `output`, which already exists and is empty.
    fn render_to(&self, markup: &StructuredMarkup, output: &Path) -> Result<(), RenderError>;
}

// ── Commit gate ──────────────────────────────────────────────────────────

const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Decides, exactly once, whether a render may publish its output.
///
/// The worker calls [`begin_commit`](Self::begin_commit) before renaming the
/// scratch file; a timed-out supervisor calls
/// [`try_abandon`](Self::try_abandon). Whichever comes first wins.
#[derive(Debug, Default)]
pub struct CommitGate(AtomicU8);

impl CommitGate {
    pub fn new() -> Self {
        Self(AtomicU8::new(RUNNING))
    }

    /// `true` if the output may be moved into place.
    pub fn begin_commit(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `true` if the render was stopped before committing.
    pub fn try_abandon(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::Acquire) == ABANDONED
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────

/// Runs an engine into a scratch file and publishes the result atomically.
#[derive(Clone)]
pub struct RenderAdapter {
    engine: Arc<dyn RenderEngine>,
}

impl RenderAdapter {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn render(&self, markup: &StructuredMarkup, destination: &Path) -> Result<PathBuf, RenderError> {
        self.render_gated(markup, destination, &CommitGate::new())
    }

    /// Like [`render`](Self::render), but publishing only if `gate` allows it.
    pub fn render_gated(
        &self,
        markup: &StructuredMarkup,
        destination: &Path,
        gate: &CommitGate,
    ) -> Result<PathBuf, RenderError> {
        prepare_destination(destination)
            .map_err(|e| RenderError::io("creating output directory", &e))?;

        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let scratch = tempfile::Builder::new()
            .prefix(".md2pdf-")
            .suffix(".pdf.part")
            .tempfile_in(dir)
            .map_err(|e| RenderError::io("creating scratch file", &e))?
            .into_temp_path();

        self.engine.render_to(markup, &scratch)?;
        check_pdf_header(&scratch)?;

        if !gate.begin_commit() {
            debug!("Discarding late output for {}", destination.display());
            return Err(RenderError::new(
                RenderErrorKind::EngineFailure,
                "render abandoned before output was published",
            ));
        }

        scratch
            .persist(destination)
            .map_err(|e| RenderError::io("moving PDF into place", &e.error))?;
        Ok(destination.to_path_buf())
    }
}

fn check_pdf_header(path: &Path) -> Result<(), RenderError> {
    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path).map_err(|e| RenderError::io("reading engine output", &e))?;
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == PDF_MAGIC => Ok(()),
        Ok(()) => Err(RenderError::new(
            RenderErrorKind::EngineFailure,
            format!("engine output is not a PDF (starts with {magic:?})"),
        )),
        Err(_) => Err(RenderError::new(
            RenderErrorKind::EngineFailure,
            "engine produced no PDF output",
        )),
    }
}

// ── External command engine ──────────────────────────────────────────────

/// Renders by running an external program such as `weasyprint`.
///
/// The HTML goes to a temporary file; `{input}`, `{output}` and
/// `{base_url}` in the argument template are replaced per document.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    label: String,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let label = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            args,
            timeout: None,
            label,
        }
    }

    /// Kill the child process once it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Locate the configured program and build an engine for it.
    pub fn from_config(command: &EngineCommand, timeout: Option<Duration>) -> Result<Self, Md2PdfError> {
        let located = if command.program == engine_locate::DEFAULT_ENGINE {
            engine_locate::locate_default_engine().map(Path::to_path_buf)
        } else {
            engine_locate::locate_engine(&command.program)
        };
        let program = located.map_err(|e| Md2PdfError::EngineUnavailable {
            engine: command.program.clone(),
            detail: e.to_string(),
        })?;
        debug!("Using rendering engine at {}", program.display());
        Ok(Self::new(program, command.args.clone()).with_timeout(timeout))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn expand_args(&self, input: &Path, output: &Path, base_url: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let base_url = base_url.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
                    .replace(BASE_URL_PLACEHOLDER, &base_url)
            })
            .collect()
    }

    fn wait(&self, child: &mut std::process::Child) -> Result<ExitStatus, RenderError> {
        let Some(limit) = self.timeout else {
            return child
                .wait()
                .map_err(|e| RenderError::io("waiting for engine", &e));
        };

        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| RenderError::io("waiting for engine", &e))?
            {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill {}: {}", self.label, e);
                }
                let _ = child.wait();
                return Err(RenderError::new(
                    RenderErrorKind::EngineFailure,
                    format!("{} timed out after {}s and was killed", self.label, limit.as_secs_f32()),
                ));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl RenderEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.label
    }

    fn render_to(&self, markup: &StructuredMarkup, output: &Path) -> Result<(), RenderError> {
        let mut html_file = tempfile::Builder::new()
            .prefix(".md2pdf-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| RenderError::io("creating HTML scratch file", &e))?;
        html_file
            .write_all(markup.html.as_bytes())
            .and_then(|()| html_file.flush())
            .map_err(|e| RenderError::io("writing HTML scratch file", &e))?;
        let html_path = html_file.into_temp_path();

        let base_url = markup
            .base_url
            .clone()
            .or_else(|| html_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let args = self.expand_args(&html_path, output, &base_url);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => RenderError::new(
                    RenderErrorKind::EngineUnavailable,
                    format!("cannot start '{}': {e}", self.program.display()),
                ),
                _ => RenderError::io("starting engine", &e),
            })?;

        let stderr = child.stderr.take();
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = self.wait(&mut child);
        let diagnostics = reader.join().unwrap_or_default();
        let status = status?;

        if !status.success() {
            return Err(classify_failure(&diagnostics, &status.to_string()));
        }
        if !diagnostics.trim().is_empty() {
            debug!("{} diagnostics: {}", self.label, diagnostics.trim());
        }
        Ok(())
    }
}

// ── Failure classification ───────────────────────────────────────────────

static MISSING_FONT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(font\b.*\b(not found|could not be loaded|cannot be loaded|failed to load|missing)|no (usable|suitable) fonts?|fontconfig error)").unwrap()
});

static INVALID_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(parse ?error|invalid (css|html|markup|selector|document)|syntax ?error|unexpected token)").unwrap()
});

static IO_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(permission denied|no such file|read-only file ?system|no space left|is a directory|\b(io|os)error\b)").unwrap()
});

/// Map a failed engine run to a [`RenderError`] from its stderr text.
pub(crate) fn classify_failure(stderr: &str, status: &str) -> RenderError {
    let patterns: [(&Lazy<Regex>, RenderErrorKind); 3] = [
        (&MISSING_FONT, RenderErrorKind::MissingFont),
        (&INVALID_MARKUP, RenderErrorKind::InvalidMarkup),
        (&IO_FAILURE, RenderErrorKind::IoFailure),
    ];

    for (pattern, kind) in patterns {
        if let Some(line) = stderr.lines().find(|l| pattern.is_match(l)) {
            return RenderError::new(kind, line.trim());
        }
    }

    let last = stderr
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("no diagnostics");
    RenderError::new(RenderErrorKind::EngineFailure, format!("engine {status}: {last}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn markup() -> StructuredMarkup {
        StructuredMarkup {
            title: Some("t".into()),
            body_html: "<p>x</p>".into(),
            html: "<html><body><p>x</p></body></html>".into(),
            base_url: None,
        }
    }

    struct BytesEngine(&'static [u8]);

    impl RenderEngine for BytesEngine {
        fn name(&self) -> &str {
            "bytes"
        }
        fn render_to(&self, _: &StructuredMarkup, output: &Path) -> Result<(), RenderError> {
            fs::write(output, self.0).map_err(|e| RenderError::io("write", &e))
        }
    }

    struct HalfWriteEngine;

    impl RenderEngine for HalfWriteEngine {
        fn name(&self) -> &str {
            "half"
        }
        fn render_to(&self, _: &StructuredMarkup, output: &Path) -> Result<(), RenderError> {
            fs::write(output, b"%PDF-1.7 trunc").map_err(|e| RenderError::io("write", &e))?;
            Err(RenderError::new(RenderErrorKind::EngineFailure, "crashed mid-page"))
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".part"))
            .collect()
    }

    #[test]
    fn successful_render_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub/doc.pdf");
        let adapter = RenderAdapter::new(Arc::new(BytesEngine(b"%PDF-1.7 ok")));
        let out = adapter.render(&markup(), &dest).unwrap();
        assert_eq!(out, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"%PDF-1.7 ok");
        assert!(leftovers(&dir.path().join("sub")).is_empty());
    }

    #[test]
    fn failed_render_keeps_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc.pdf");
        fs::write(&dest, b"%PDF-old complete").unwrap();

        let adapter = RenderAdapter::new(Arc::new(HalfWriteEngine));
        let err = adapter.render(&markup(), &dest).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::EngineFailure);
        assert_eq!(fs::read(&dest).unwrap(), b"%PDF-old complete");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn non_pdf_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc.pdf");
        let adapter = RenderAdapter::new(Arc::new(BytesEngine(b"<html>")));
        let err = adapter.render(&markup(), &dest).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::EngineFailure);
        assert!(!dest.exists());
    }

    #[test]
    fn abandoned_render_is_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc.pdf");
        let gate = CommitGate::new();
        assert!(gate.try_abandon());

        let adapter = RenderAdapter::new(Arc::new(BytesEngine(b"%PDF-late")));
        assert!(adapter.render_gated(&markup(), &dest, &gate).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn gate_decides_once() {
        let gate = CommitGate::new();
        assert!(gate.begin_commit());
        assert!(!gate.try_abandon());
        assert!(!gate.is_abandoned());
    }

    #[test]
    fn classify_known_failures() {
        let e = classify_failure("WARNING: Font 'Nope Sans' could not be loaded\n", "exit status: 1");
        assert_eq!(e.kind, RenderErrorKind::MissingFont);
        let e = classify_failure("CSS parse error at line 3\n", "exit status: 1");
        assert_eq!(e.kind, RenderErrorKind::InvalidMarkup);
        let e = classify_failure("OSError: [Errno 13] Permission denied: '/x'\n", "exit status: 1");
        assert_eq!(e.kind, RenderErrorKind::IoFailure);
        let e = classify_failure("boom\n\n", "exit status: 2");
        assert_eq!(e.kind, RenderErrorKind::EngineFailure);
        assert!(e.detail.contains("boom"));
    }

    #[test]
    fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new("/definitely/not/an/engine", vec![]);
        let err = engine.render_to(&markup(), &dir.path().join("x.pdf")).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::EngineUnavailable);
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_fills_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc.pdf");
        let engine = CommandEngine::new(
            "sh",
            vec![
                "-c".into(),
                "test -s \"$1\" && printf '%%PDF-1.4 fake' > \"$2\"".into(),
                "sh".into(),
                "{input}".into(),
                "{output}".into(),
            ],
        );
        RenderAdapter::new(Arc::new(engine)).render(&markup(), &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"%PDF-1.4 fake");
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_stderr_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(
            "sh",
            vec!["-c".into(), "echo \"Font 'X' not found\" >&2; exit 3".into()],
        );
        let err = engine.render_to(&markup(), &dir.path().join("x.pdf")).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::MissingFont);
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_is_killed_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new("sh", vec!["-c".into(), "exec sleep 5".into()])
            .with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let err = engine.render_to(&markup(), &dir.path().join("x.pdf")).unwrap_err();
        assert!(err.detail.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
