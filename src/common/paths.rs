//! Configuration and artifact paths
//!
//! Project-local files win over per-user ones: `./specrun.toml` is read
//! before the platform config directory.

use std::io;
use std::path::{Path, PathBuf};

/// Application name used for per-user directories
const APP_NAME: &str = "specrun";

/// File name of the project-local configuration
pub const LOCAL_CONFIG_FILE: &str = "specrun.toml";

/// Get the per-user configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/specrun/`
/// - macOS: `~/Library/Application Support/specrun/`
/// - Windows: `%APPDATA%\specrun\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the per-user configuration file
pub fn user_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Resolve which configuration file to load
///
/// An explicit path is returned as-is (even if missing, so the caller can
/// report it). Otherwise the first existing file of `./specrun.toml` and
/// the per-user config wins.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    user_config_path().filter(|p| p.exists())
}

/// Ensure a directory exists, returning it
pub fn ensure_dir(dir: &Path) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}

/// Turn an arbitrary artifact name into a safe file stem
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "artifact".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let explicit = PathBuf::from("/nonexistent/specrun.toml");
        assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("login page/1"), "login_page_1");
        assert_eq!(sanitize_file_stem("ok-name_2"), "ok-name_2");
        assert_eq!(sanitize_file_stem(""), "artifact");
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let created = ensure_dir(&nested).unwrap();
        assert!(created.is_dir());
    }
}
