//! Destination path resolution.
//!
//! Paths are compared lexically (after folding `.` and `..`), never through
//! `canonicalize`, so resolution works for files that do not exist yet and
//! does not depend on symlinks.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::JobError;

/// Lexically normalise a path: drop `.` components and fold `..`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Where the PDF for `source` goes.
///
/// * `preserve_structure` off, or no base: `output_root/<stem>.pdf`
/// * on: `output_root/<source relative to base>` with a `.pdf` extension
///
/// Fails with [`JobError::PathOutsideBase`] when the source is not under
/// the base directory.
pub fn resolve(
    source: &Path,
    base_directory: Option<&Path>,
    output_root: &Path,
    preserve_structure: bool,
) -> Result<PathBuf, JobError> {
    let source_norm = normalize(source);

    let relative = match base_directory {
        Some(base) if preserve_structure => {
            let base_norm = normalize(base);
            source_norm
                .strip_prefix(&base_norm)
                .ok()
                .filter(|rel| rel.file_name().is_some())
                .map(Path::to_path_buf)
                .ok_or_else(|| JobError::PathOutsideBase {
                    path: source.to_path_buf(),
                    base: base.to_path_buf(),
                })?
        }
        _ => PathBuf::from(source_norm.file_name().ok_or_else(|| JobError::InvalidSourcePath {
            path: source.to_path_buf(),
        })?),
    };

    Ok(output_root.join(relative).with_extension("pdf"))
}

/// Create the destination's parent directories.
///
/// Another worker creating the same directory concurrently is not an error.
pub fn prepare_destination(destination: &Path) -> io::Result<()> {
    let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    match std::fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Deepest directory containing every source file.
///
/// `None` for an empty list or sources with no common prefix.
pub fn common_base<P: AsRef<Path>>(sources: &[P]) -> Option<PathBuf> {
    let mut dirs = sources
        .iter()
        .map(|p| normalize(p.as_ref()).parent().map(Path::to_path_buf).unwrap_or_default());

    let mut base = dirs.next()?;
    for dir in dirs {
        while !dir.starts_with(&base) {
            if !base.pop() {
                return None;
            }
        }
    }
    (!base.as_os_str().is_empty()).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserve_recreates_subtree() {
        let out = resolve(
            Path::new("/docs/a/b.md"),
            Some(Path::new("/docs")),
            Path::new("/out"),
            true,
        )
        .unwrap();
        assert_eq!(out, PathBuf::from("/out/a/b.pdf"));
    }

    #[test]
    fn flat_uses_file_name_only() {
        let out = resolve(
            Path::new("/docs/a/b.md"),
            Some(Path::new("/docs")),
            Path::new("/out"),
            false,
        )
        .unwrap();
        assert_eq!(out, PathBuf::from("/out/b.pdf"));
    }

    #[test]
    fn source_outside_base_is_rejected() {
        let err = resolve(
            Path::new("/other/c.md"),
            Some(Path::new("/docs")),
            Path::new("/out"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, JobError::PathOutsideBase { .. }));
    }

    #[test]
    fn dot_dot_cannot_escape_base() {
        let err = resolve(
            Path::new("/docs/a/../../etc/x.md"),
            Some(Path::new("/docs")),
            Path::new("/out"),
            true,
        );
        assert!(err.is_err());

        let ok = resolve(
            Path::new("/docs/./a/../b/c.markdown"),
            Some(Path::new("/docs/")),
            Path::new("/out"),
            true,
        )
        .unwrap();
        assert_eq!(ok, PathBuf::from("/out/b/c.pdf"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let args = (Path::new("/d/x/y.md"), Some(Path::new("/d")), Path::new("o"));
        let a = resolve(args.0, args.1, args.2, true).unwrap();
        let b = resolve(args.0, args.1, args.2, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn preserve_without_base_is_flat() {
        let out = resolve(Path::new("/d/x/y.md"), None, Path::new("/o"), true).unwrap();
        assert_eq!(out, PathBuf::from("/o/y.pdf"));
    }

    #[test]
    fn multi_dot_names_keep_their_stem() {
        let out = resolve(Path::new("/d/v1.2.notes.md"), None, Path::new("/o"), false).unwrap();
        assert_eq!(out, PathBuf::from("/o/v1.2.notes.pdf"));
    }

    #[test]
    fn common_base_of_siblings_and_nested() {
        let base = common_base(&["/docs/a/x.md", "/docs/b/c/y.md", "/docs/z.md"]).unwrap();
        assert_eq!(base, PathBuf::from("/docs"));
        assert_eq!(common_base::<&str>(&[]), None);
        assert_eq!(
            common_base(&["/docs/a/x.md"]).unwrap(),
            PathBuf::from("/docs/a")
        );
    }

    #[test]
    fn prepare_destination_tolerates_existing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/c.pdf");
        prepare_destination(&dest).unwrap();
        prepare_destination(&dest).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn source_without_file_name_is_rejected() {
        let err = resolve(Path::new("/docs/.."), None, Path::new("/o"), false).unwrap_err();
        assert_eq!(err.kind(), crate::error::JobErrorKind::InvalidSourcePath);
        assert!(err.to_string().contains("does not name a file"));
    }

    #[test]
    fn prepare_destination_tolerates_racing_workers() {
        use std::sync::{Arc, Barrier};

        let dir = tempfile::tempdir().unwrap();
        for round in 0..5 {
            let dest = dir.path().join(format!("r{round}/deep/er/still/x.pdf"));
            let barrier = Arc::new(Barrier::new(8));
            let threads: Vec<_> = (0..8)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let dest = dest.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        prepare_destination(&dest)
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap().unwrap();
            }
            assert!(dest.parent().unwrap().is_dir());
        }
    }
}
