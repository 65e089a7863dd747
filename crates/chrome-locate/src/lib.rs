//! # chrome-locate
//!
//! Find a Chrome or Chromium executable that a CDP client can launch in
//! headless mode, so users of `md-carousel` do not have to pass
//! `--chrome /path/to/chrome` on every run.
//!
//! ## How it works
//!
//! On the first call to [`locate_chrome`]:
//!
//! 1. `CHROME_PATH` is honoured when it points to an existing file.
//! 2. Well-known install locations for the current platform are probed
//!    (system-wide and per-user).
//! 3. Every directory on `PATH` is searched for the usual binary names
//!    (`chromium`, `chromium-browser`, `google-chrome`, …).
//!
//! The result is cached for the lifetime of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrome_locate::locate_chrome;
//!
//! let chrome = locate_chrome().expect("no Chrome/Chromium installed");
//! println!("launching {}", chrome.display());
//! ```
//!
//! ## Environment variable overrides
//!
//! - `CHROME_PATH` — absolute path to the browser executable; skips probing.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable consulted before any probing.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

/// Binary names searched on `PATH`, in preference order.
pub const BINARY_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "msedge",
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by chrome-locate.
#[derive(Error, Debug)]
pub enum LocateError {
    /// `CHROME_PATH` is set but does not name an existing file.
    #[error("{CHROME_PATH_ENV} points to '{path}', which does not exist")]
    InvalidOverride { path: PathBuf },

    /// Nothing was found in the platform locations or on `PATH`.
    #[error(
        "No Chrome/Chromium executable found.\n\
Install Chromium (e.g. `apt install chromium`) or set {CHROME_PATH_ENV}=/path/to/chrome."
    )]
    NotFound,
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the path of a usable browser executable.
///
/// Safe to call from multiple threads; probing happens at most once per
/// process once a browser has been found.
pub fn locate_chrome() -> Result<PathBuf, LocateError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve()?;
    let _ = RESOLVED_PATH.set(path.clone());
    Ok(path)
}

/// Returns `true` when [`locate_chrome`] would succeed.
pub fn is_chrome_available() -> bool {
    locate_chrome().is_ok()
}

/// Platform install locations probed after `CHROME_PATH`.
pub fn platform_candidates() -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = match std::env::consts::OS {
        "macos" => vec![
            "/Applications/Chromium.app/Contents/MacOS/Chromium".into(),
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into(),
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge".into(),
        ],
        "windows" => vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe".into(),
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe".into(),
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe".into(),
        ],
        _ => vec![
            "/usr/bin/chromium".into(),
            "/usr/bin/chromium-browser".into(),
            "/usr/bin/google-chrome".into(),
            "/usr/bin/google-chrome-stable".into(),
            "/snap/bin/chromium".into(),
            "/opt/google/chrome/chrome".into(),
        ],
    };

    // Per-user installs.
    if let Some(home) = dirs::home_dir() {
        if std::env::consts::OS == "macos" {
            out.push(home.join("Applications/Chromium.app/Contents/MacOS/Chromium"));
        }
    }
    if let Some(local) = dirs::data_local_dir() {
        if std::env::consts::OS == "windows" {
            out.push(local.join(r"Google\Chrome\Application\chrome.exe"));
            out.push(local.join(r"Chromium\Application\chrome.exe"));
        }
    }

    out
}

/// Search `candidates`, then each directory of `path_var`, for a browser.
///
/// Exposed separately from [`locate_chrome`] so callers (and tests) can probe
/// an explicit set of locations without touching the process environment.
pub fn locate_in(candidates: &[PathBuf], path_var: Option<&OsStr>) -> Option<PathBuf> {
    if let Some(found) = candidates.iter().find(|p| is_executable_file(p)) {
        return Some(found.clone());
    }

    let path_var = path_var?;
    for dir in std::env::split_paths(path_var) {
        for name in BINARY_NAMES {
            let candidate = dir.join(executable_name(name));
            if is_executable_file(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn resolve() -> Result<PathBuf, LocateError> {
    // 1. Environment variable override.
    if let Some(raw) = std::env::var_os(CHROME_PATH_ENV) {
        if !raw.is_empty() {
            let p = PathBuf::from(raw);
            if p.is_file() {
                return Ok(p);
            }
            return Err(LocateError::InvalidOverride { path: p });
        }
    }

    // 2 + 3. Platform locations, then PATH.
    let path_var = std::env::var_os("PATH");
    locate_in(&platform_candidates(), path_var.as_deref()).ok_or(LocateError::NotFound)
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn platform_candidates_nonempty() {
        assert!(!platform_candidates().is_empty());
    }

    #[test]
    fn missing_candidates_and_no_path_yield_none() {
        let candidates = vec![PathBuf::from("/definitely/not/chrome")];
        assert_eq!(locate_in(&candidates, None), None);
    }

    #[cfg(unix)]
    #[test]
    fn explicit_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("my-chrome");
        make_executable(&bin);
        let found = locate_in(&[PathBuf::from("/nope"), bin.clone()], None);
        assert_eq!(found, Some(bin));
    }

    #[cfg(unix)]
    #[test]
    fn searches_path_directories_in_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(&dir.path().join("google-chrome"));
        make_executable(&dir.path().join("chromium"));
        let path_var = std::env::join_paths([dir.path()]).unwrap();
        let found = locate_in(&[], Some(path_var.as_os_str())).unwrap();
        assert_eq!(found.file_name().unwrap(), "chromium");
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chromium"), b"not a binary").unwrap();
        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(locate_in(&[], Some(path_var.as_os_str())), None);
    }

    #[test]
    fn not_found_message_mentions_override() {
        let msg = LocateError::NotFound.to_string();
        assert!(msg.contains(CHROME_PATH_ENV));
    }
}
