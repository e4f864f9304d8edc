//! File helpers for exercising file-backed value sources.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{NamedTempFile, TempDir};

/// Create a scratch directory that is removed when the handle drops.
///
/// # Errors
///
/// Returns an error when the directory cannot be created.
pub fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("rtc-test-")
        .tempdir()
        .context("failed to create scratch directory")
}

/// Write `contents` to `dir/name` in place, truncating any previous content.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Replace `dir/name` by writing a sibling temp file and renaming it over
/// the target, the way editors and config management tools publish files.
///
/// # Errors
///
/// Returns an error when the temp file cannot be written or persisted.
pub fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage temp file in {}", dir.display()))?;
    staged
        .write_all(contents.as_bytes())
        .context("failed to write staged contents")?;
    staged.flush().context("failed to flush staged contents")?;
    staged
        .persist(&path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_existing_content() -> Result<()> {
        let dir = scratch_dir()?;
        let path = write_file(dir.path(), "values.yaml", "a: 1\n")?;
        let replaced = write_atomic(dir.path(), "values.yaml", "a: 2\n")?;
        assert_eq!(path, replaced);
        assert_eq!(fs::read_to_string(&path)?, "a: 2\n");
        Ok(())
    }

    #[test]
    fn write_atomic_creates_missing_file() -> Result<()> {
        let dir = scratch_dir()?;
        let path = write_atomic(dir.path(), "fresh.yaml", "b: x\n")?;
        assert!(path.exists());
        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }
}
