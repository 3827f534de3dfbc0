//! Finding specification files on disk

use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::{Error, Result};

fn compile_pattern(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| Error::Discovery(format!("Invalid pattern '{pattern}': {e}")))
}

/// Walk `dir` and return every file whose path relative to `dir` matches
/// `pattern`, sorted so runs are reproducible.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Discovery(format!(
            "Specification directory '{}' does not exist",
            dir.display()
        )));
    }

    let matcher = compile_pattern(pattern)?;
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(dir)
                .map(|rel| matcher.is_match(rel))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();

    files.sort();
    tracing::debug!(
        "Discovered {} specification file(s) under {} matching {}",
        files.len(),
        dir.display(),
        pattern
    );
    Ok(files)
}

/// Resolve explicit command-line paths
///
/// Files are taken as given; directories are searched with `pattern`.
/// With no paths at all, `default_dir` is searched.
pub fn resolve(paths: &[PathBuf], default_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        return discover(default_dir, pattern);
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover(path, pattern)?);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(Error::Discovery(format!(
                "Specification file '{}' not found",
                path.display()
            )));
        }
    }
    Ok(files)
}
