//! Input resolution: expand user-supplied paths into Markdown source files.
//!
//! Directories are walked recursively in file-name order, so a batch over
//! the same tree always lists its jobs identically. Hidden entries
//! (`.obsidian`, `.git`, `.trash`) are skipped along with everything below
//! them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::paths::normalize;
use crate::error::{JobError, Md2PdfError};

/// File extensions treated as Markdown (case-insensitive).
pub const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|m| ext.eq_ignore_ascii_case(m))
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Expand files and directories into an ordered, duplicate-free list of
/// Markdown files.
///
/// A path that does not exist is fatal ([`Md2PdfError::InputNotFound`]).
/// Explicitly named files without a Markdown extension are skipped with a
/// warning.
pub fn enumerate_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>, Md2PdfError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for input in paths {
        let input = input.as_ref();
        if !input.exists() {
            return Err(Md2PdfError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        if input.is_file() {
            if !is_markdown(input) {
                warn!("Skipping '{}': not a Markdown file", input.display());
                continue;
            }
            if seen.insert(normalize(input)) {
                files.push(input.to_path_buf());
            }
            continue;
        }

        let before = files.len();
        for entry in WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under '{}': {}", input.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_file() && is_markdown(path) && seen.insert(normalize(path)) {
                files.push(path.to_path_buf());
            }
        }
        debug!(
            "Found {} Markdown files under '{}'",
            files.len() - before,
            input.display()
        );
    }

    Ok(files)
}

/// Read a source file as UTF-8 text.
pub fn load_source(path: &Path) -> Result<String, JobError> {
    let bytes = std::fs::read(path).map_err(|e| JobError::Read {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| JobError::Encoding {
        path: path.to_path_buf(),
        offset: e.utf8_error().valid_up_to(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str, body: &str) -> PathBuf {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn test_is_markdown() {
        assert!(is_markdown(Path::new("a.md")));
        assert!(is_markdown(Path::new("a.MARKDOWN")));
        assert!(!is_markdown(Path::new("a.txt")));
        assert!(!is_markdown(Path::new("md")));
    }

    #[test]
    fn walks_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "b.md", "");
        touch(root, "a/z.markdown", "");
        touch(root, "a/y.md", "");
        touch(root, ".obsidian/config.md", "");
        touch(root, "notes.txt", "");

        let found = enumerate_inputs(&[root]).unwrap();
        let rel: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a/y.md"),
                PathBuf::from("a/z.markdown"),
                PathBuf::from("b.md"),
            ]
        );
    }

    #[test]
    fn duplicates_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "x.md", "");
        let found = enumerate_inputs(&[file.clone(), dir.path().to_path_buf(), file]).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn missing_input_is_fatal() {
        let err = enumerate_inputs(&["/definitely/not/here.md"]).unwrap_err();
        assert!(matches!(err, Md2PdfError::InputNotFound { .. }));
    }

    #[test]
    fn explicit_non_markdown_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let txt = touch(dir.path(), "a.txt", "");
        assert!(enumerate_inputs(&[txt]).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.md");
        fs::write(&p, b"ok\xff").unwrap();
        let err = load_source(&p).unwrap_err();
        assert!(matches!(err, JobError::Encoding { offset: 2, .. }));
    }

    #[test]
    fn unreadable_source_is_read_error() {
        let err = load_source(Path::new("/no/such/file.md")).unwrap_err();
        assert!(matches!(err, JobError::Read { .. }));
    }
}
