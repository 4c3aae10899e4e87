//! # engine-locate
//!
//! Find the external HTML-to-PDF layout engine that `md2pdf` delegates
//! pagination to, so callers get a clear setup error before a batch starts
//! instead of one spawn failure per document.
//!
//! ## How it works
//!
//! On a call to [`locate_engine`]:
//!
//! 1. If the requested name is [`DEFAULT_ENGINE`] and `MD2PDF_ENGINE_PATH` is
//!    set, that file is used (and must be executable).
//! 2. If the requested name already contains a path separator, it is checked
//!    directly. An explicit name is never replaced by the override.
//! 3. Otherwise every directory on `PATH` is searched for the platform's
//!    executable names (`weasyprint`, `weasyprint.exe`, …).
//!
//! [`locate_default_engine`] caches the result for the process lifetime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_locate::{locate_default_engine, probe_version};
//!
//! let path = locate_default_engine().expect("weasyprint not installed");
//! println!("engine: {} ({})", path.display(), probe_version(path).unwrap_or_default());
//! ```
//!
//! ## Environment variable overrides
//!
//! - `MD2PDF_ENGINE_PATH` — path used in place of the default engine; skips the `PATH` search.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Engine used when the caller does not name one.
pub const DEFAULT_ENGINE: &str = "weasyprint";

/// Environment variable pointing at an explicit engine executable.
pub const ENGINE_PATH_ENV: &str = "MD2PDF_ENGINE_PATH";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by engine-locate operations.
#[derive(Error, Debug)]
pub enum LocateError {
    /// The override variable names something that cannot be executed.
    #[error("{env} points to '{path}', which is not an executable file")]
    BadOverride { env: &'static str, path: PathBuf },

    /// Nothing matching the engine name exists on `PATH`.
    #[error("Rendering engine '{name}' was not found on PATH")]
    NotFound { name: String },

    /// The executable exists but could not be run.
    #[error("Failed to run '{path}': {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Internal: platform metadata ──────────────────────────────────────────────

/// File names to try for `name` on the current platform.
fn candidate_names(name: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        ["exe", "cmd", "bat"]
            .iter()
            .map(|ext| format!("{name}.{ext}"))
            .chain(std::iter::once(name.to_string()))
            .collect()
    } else {
        vec![name.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static DEFAULT_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `name` to an executable path.
///
/// [`ENGINE_PATH_ENV`] only stands in for [`DEFAULT_ENGINE`]; any other name
/// is resolved as an explicit path or against `PATH`.
pub fn locate_engine(name: &str) -> Result<PathBuf, LocateError> {
    locate_with_override(
        name,
        std::env::var_os(ENGINE_PATH_ENV).as_deref(),
        std::env::var_os("PATH").as_deref(),
    )
}

fn locate_with_override(
    name: &str,
    override_path: Option<&OsStr>,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, LocateError> {
    if name == DEFAULT_ENGINE {
        if let Some(raw) = override_path.filter(|v| !v.is_empty()) {
            let path = PathBuf::from(raw);
            if is_executable(&path) {
                return Ok(path);
            }
            return Err(LocateError::BadOverride {
                env: ENGINE_PATH_ENV,
                path,
            });
        }
    }

    locate_in_path(name, search_path)
}

/// Resolve `name` against an explicit search path (same format as `PATH`).
///
/// Names containing a path separator bypass the search.
pub fn locate_in_path(name: &str, search_path: Option<&OsStr>) -> Result<PathBuf, LocateError> {
    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return if is_executable(as_path) {
            Ok(as_path.to_path_buf())
        } else {
            Err(LocateError::NotFound {
                name: name.to_string(),
            })
        };
    }

    let Some(search_path) = search_path else {
        return Err(LocateError::NotFound {
            name: name.to_string(),
        });
    };

    let candidates = candidate_names(name);
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|p| is_executable(p))
        .ok_or_else(|| LocateError::NotFound {
            name: name.to_string(),
        })
}

/// Locate [`DEFAULT_ENGINE`], caching the answer for later calls.
///
/// Failures are not cached, so installing the engine mid-session works.
pub fn locate_default_engine() -> Result<&'static Path, LocateError> {
    if let Some(path) = DEFAULT_PATH.get() {
        return Ok(path.as_path());
    }
    let path = locate_engine(DEFAULT_ENGINE)?;
    Ok(DEFAULT_PATH.get_or_init(|| path).as_path())
}

/// Run `<engine> --version` and return the first non-empty output line.
pub fn probe_version(path: &Path) -> Result<String, LocateError> {
    let output = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|source| LocateError::Probe {
            path: path.to_path_buf(),
            source,
        })?;

    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };

    Ok(text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_engine_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate_in_path("no-such-engine", Some(dir.path().as_os_str())).unwrap_err();
        assert!(matches!(err, LocateError::NotFound { ref name } if name == "no-such-engine"));
    }

    #[test]
    fn no_search_path_is_not_found() {
        assert!(locate_in_path("weasyprint", None).is_err());
    }

    #[test]
    fn candidate_names_include_bare_name() {
        let names = candidate_names("weasyprint");
        assert!(names.iter().any(|n| n == "weasyprint"));
    }

    #[cfg(unix)]
    #[test]
    fn finds_executable_on_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake-engine");
        std::fs::write(&exe, "#!/bin/sh\necho 'FakeEngine version 1.2'\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let joined = std::env::join_paths([Path::new("/definitely/missing"), dir.path()]).unwrap();
        let found = locate_in_path("fake-engine", Some(&joined)).unwrap();
        assert_eq!(found, exe);

        assert_eq!(probe_version(&found).unwrap(), "FakeEngine version 1.2");
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain"), "not a program").unwrap();
        assert!(locate_in_path("plain", Some(dir.path().as_os_str())).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn explicit_path_bypasses_search() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("engine");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o700)).unwrap();

        let found = locate_in_path(exe.to_str().unwrap(), None).unwrap();
        assert_eq!(found, exe);
    }

    #[cfg(unix)]
    #[test]
    fn override_replaces_only_the_default_engine() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pinned = dir.path().join("pinned");
        let chosen = dir.path().join("chosen");
        for exe in [&pinned, &chosen] {
            std::fs::write(exe, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let found = locate_with_override(DEFAULT_ENGINE, Some(pinned.as_os_str()), None).unwrap();
        assert_eq!(found, pinned);

        let found =
            locate_with_override(chosen.to_str().unwrap(), Some(pinned.as_os_str()), None).unwrap();
        assert_eq!(found, chosen);
    }

    #[test]
    fn bad_override_is_reported_for_default_engine() {
        let err = locate_with_override(DEFAULT_ENGINE, Some(OsStr::new("/definitely/missing")), None)
            .unwrap_err();
        assert!(matches!(err, LocateError::BadOverride { .. }));
    }
}
