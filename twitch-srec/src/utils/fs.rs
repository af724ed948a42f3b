//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / parent-directory checks.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all(parent).await
}

/// Ensure a directory exists (synchronous variant, used before the runtime logs anything).
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

/// Create `path` with `contents` if it does not exist yet.
///
/// Returns `true` when the file was created.
pub async fn create_if_missing(path: &Path, contents: &str) -> Result<bool> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => return Ok(false),
        Ok(false) => {}
        Err(e) => return Err(io_error("checking", path, e)),
    }
    ensure_parent_dir(path).await?;
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| io_error("creating", path, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_if_missing_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("list.txt");

        assert!(create_if_missing(&path, "first\n").await.unwrap());
        assert!(!create_if_missing(&path, "second\n").await.unwrap());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "first\n");
    }
}
