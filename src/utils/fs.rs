//! File system helpers for build contexts.
//!
//! Scripts and manifests are written with [`atomic_write`] so an interrupted build never
//! leaves a half-written file that looks complete.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

/// Create `path` and its parents if missing.
///
/// # Errors
///
/// Fails if the directory cannot be created or `path` exists and is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Atomically write `content` to `path` through a sibling `.tmp` file.
///
/// Parent directories are created as needed. Readers see either the old file or the
/// complete new one.
///
/// # Errors
///
/// Fails if the temporary file cannot be written, synced or renamed.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path).with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

/// Copy a file, or a directory tree, from `src` to `dst`.
///
/// Symlinks are not followed. Existing files at the destination are overwritten.
///
/// # Errors
///
/// Fails if `src` cannot be read or any entry cannot be copied.
pub fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            ensure_dir(parent)?;
        }
        fs::copy(src, dst)
            .with_context(|| format!("Failed to copy file from {} to {}", src.display(), dst.display()))?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to read directory: {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy file from {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Remove everything inside `path`, keeping the directory itself.
///
/// A missing directory is not an error.
///
/// # Errors
///
/// Fails if an entry cannot be removed.
pub fn clear_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(path).with_context(|| format!("Failed to read directory: {}", path.display()))? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&entry_path)
                .with_context(|| format!("Failed to remove directory: {}", entry_path.display()))?;
        } else {
            fs::remove_file(&entry_path).with_context(|| format!("Failed to remove file: {}", entry_path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ctx").join("script");

        atomic_write(&path, b"FROM scratch\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "FROM scratch\n");
        assert!(!temp.path().join("ctx").join("script.tmp").exists());

        atomic_write(&path, b"FROM ubuntu\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "FROM ubuntu\n");
    }

    #[test]
    fn test_ensure_dir_on_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(ensure_dir(&file).is_err());
    }

    #[test]
    fn test_copy_path_file_and_tree() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested").join("b.txt"), "b").unwrap();

        let dst = temp.path().join("dst");
        copy_path(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested").join("b.txt")).unwrap(), "b");

        let single = temp.path().join("out").join("copy.txt");
        copy_path(&src.join("a.txt"), &single).unwrap();
        assert_eq!(fs::read_to_string(single).unwrap(), "a");
    }

    #[test]
    fn test_clear_dir_keeps_root() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("build");
        fs::create_dir_all(root.join("old-ctx")).unwrap();
        fs::write(root.join("stray"), "x").unwrap();

        clear_dir(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        clear_dir(&temp.path().join("missing")).unwrap();
    }
}
