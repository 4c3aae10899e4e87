//! Batch planning: turn source paths plus a [`BatchConfig`] into immutable
//! [`ConversionJob`]s.
//!
//! Everything that can fail for the batch as a whole (unknown theme,
//! unusable output root) fails here, before any job is dispatched.
//! Everything that can fail for one file is deferred to that file's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{BatchConfig, FontConfig};
use crate::error::{JobError, Md2PdfError};
use crate::pipeline::paths::{self, common_base};
use crate::pipeline::transform::TransformOptions;
use crate::theme::{get_theme, Theme};

/// One source file's unit of work. Immutable once planned.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Position in the batch; results are reported in this order.
    pub index: usize,
    pub source: PathBuf,
    pub output_root: PathBuf,
    pub theme: Arc<Theme>,
    pub font: FontConfig,
    pub preserve_structure: bool,
    pub base_directory: Option<PathBuf>,
    pub document_title: bool,
    /// Set when an earlier job in the batch already resolves to the same PDF.
    pub collides_with: Option<PathBuf>,
}

impl ConversionJob {
    /// Where this job's PDF goes.
    pub fn destination(&self) -> Result<PathBuf, JobError> {
        let dest = paths::resolve(
            &self.source,
            self.base_directory.as_deref(),
            &self.output_root,
            self.preserve_structure,
        )?;
        if let Some(first) = &self.collides_with {
            return Err(JobError::PathCollision {
                destination: dest,
                claimed_by: first.clone(),
            });
        }
        Ok(dest)
    }

    /// Best-effort destination for reporting, even when resolution fails.
    pub fn planned_output(&self) -> PathBuf {
        paths::resolve(
            &self.source,
            self.base_directory.as_deref(),
            &self.output_root,
            self.preserve_structure,
        )
        .unwrap_or_else(|_| self.output_root.clone())
    }

    pub fn transform_options(&self) -> TransformOptions {
        let title = self
            .document_title
            .then(|| self.source.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .flatten();
        TransformOptions {
            title,
            base_url: self.source.parent().map(Path::to_path_buf),
        }
    }
}

/// Make `path` absolute without touching the file system.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path)
        .map(|p| paths::normalize(&p))
        .unwrap_or_else(|_| paths::normalize(path))
}

/// Plan one job per source.
///
/// Resolves the theme and the base directory, creates the output root, and
/// marks every job after the first that lands on an already-claimed PDF.
pub fn plan_batch<P: AsRef<Path>>(
    sources: &[P],
    config: &BatchConfig,
) -> Result<Vec<ConversionJob>, Md2PdfError> {
    let theme = get_theme(&config.theme)?;

    let output_root = absolute(&config.output_root);
    if output_root.exists() && !output_root.is_dir() {
        return Err(Md2PdfError::InvalidOutputRoot {
            path: config.output_root.clone(),
            reason: "exists and is not a directory".into(),
        });
    }
    std::fs::create_dir_all(&output_root).map_err(|e| Md2PdfError::InvalidOutputRoot {
        path: config.output_root.clone(),
        reason: e.to_string(),
    })?;

    let sources: Vec<PathBuf> = sources.iter().map(|s| absolute(s.as_ref())).collect();

    let base_directory = match (&config.base_directory, config.preserve_structure) {
        (Some(base), _) => Some(absolute(base)),
        (None, true) => {
            let detected = common_base(&sources);
            if let Some(base) = &detected {
                debug!("Detected common base directory {}", base.display());
            }
            detected
        }
        (None, false) => None,
    };

    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut jobs = Vec::with_capacity(sources.len());

    for (index, source) in sources.into_iter().enumerate() {
        let mut job = ConversionJob {
            index,
            source,
            output_root: output_root.clone(),
            theme: Arc::clone(&theme),
            font: config.font.clone(),
            preserve_structure: config.preserve_structure,
            base_directory: base_directory.clone(),
            document_title: config.document_title,
            collides_with: None,
        };

        if let Ok(dest) = job.destination() {
            match claimed.get(&dest) {
                Some(first) => {
                    warn!(
                        "'{}' and '{}' both map to {}; the later one will not be converted",
                        first.display(),
                        job.source.display(),
                        dest.display()
                    );
                    job.collides_with = Some(first.clone());
                }
                None => {
                    claimed.insert(dest, job.source.clone());
                }
            }
        }
        jobs.push(job);
    }

    info!(
        "Planned {} jobs → {} (theme {}, structure {})",
        jobs.len(),
        output_root.display(),
        theme.id,
        if config.preserve_structure { "preserved" } else { "flattened" }
    );
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobErrorKind;

    fn config(out: &Path, preserve: bool) -> BatchConfig {
        BatchConfig::builder()
            .output_root(out)
            .preserve_structure(preserve)
            .build()
            .unwrap()
    }

    #[test]
    fn flat_duplicates_collide_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let sources = [dir.path().join("a/notes.md"), dir.path().join("b/notes.md")];
        let jobs = plan_batch(&sources, &config(&out, false)).unwrap();

        assert!(jobs[0].destination().is_ok());
        let err = jobs[1].destination().unwrap_err();
        assert_eq!(err.kind(), JobErrorKind::PathCollision);
    }

    #[test]
    fn preserved_structure_auto_detects_base() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let sources = [dir.path().join("docs/a/notes.md"), dir.path().join("docs/b/notes.md")];
        let jobs = plan_batch(&sources, &config(&out, true)).unwrap();

        let base = jobs[0].base_directory.clone().unwrap();
        assert!(base.ends_with("docs"));
        let a = jobs[0].destination().unwrap();
        let b = jobs[1].destination().unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("out/a/notes.pdf"));
        assert!(out.is_dir());
    }

    #[test]
    fn output_root_that_is_a_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("taken");
        std::fs::write(&file, "x").unwrap();
        let err = plan_batch(&[dir.path().join("a.md")], &config(&file, true)).unwrap_err();
        assert!(matches!(err, Md2PdfError::InvalidOutputRoot { .. }));
    }

    #[test]
    fn unknown_theme_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), true);
        cfg.theme = "neon".into();
        let err = plan_batch(&[dir.path().join("a.md")], &cfg).unwrap_err();
        assert!(matches!(err, Md2PdfError::UnknownTheme { .. }));
    }

    #[test]
    fn title_follows_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = plan_batch(&[dir.path().join("My Notes.md")], &config(dir.path(), false)).unwrap();
        let opts = jobs[0].transform_options();
        assert_eq!(opts.title.as_deref(), Some("My Notes"));
        assert_eq!(opts.base_url.as_deref(), Some(dir.path()));
    }
}
