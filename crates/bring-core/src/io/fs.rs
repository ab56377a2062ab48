//! Filesystem helpers shared by steps and the target merger.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// One regular file (or symlink) found under a root.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Path relative to the walk root.
    pub relative: PathBuf,
    /// Absolute path on disk.
    pub absolute: PathBuf,
}

/// Render a relative path with `/` separators.
pub fn rel_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every non-directory entry below `root`, skipping directories named in `exclude`.
/// Results are sorted by relative path.
pub fn walk_files<S: AsRef<str>>(root: &Path, exclude: &[S]) -> io::Result<Vec<WalkedFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && exclude.iter().any(|x| e.file_name().to_str() == Some(x.as_ref())))
        });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        files.push(WalkedFile {
            relative,
            absolute: entry.path().to_path_buf(),
        });
    }
    Ok(files)
}

/// Copy the tree under `src` into `dst`, skipping excluded directory names.
/// Existing files in `dst` are overwritten.
pub fn copy_tree<S: AsRef<str>>(src: &Path, dst: &Path, exclude: &[S]) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let files = walk_files(src, exclude)?;
    for file in &files {
        copy_file(&file.absolute, &dst.join(&file.relative))?;
    }
    Ok(files.len())
}

/// Copy one file (or symlink), creating parent directories and keeping permissions.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dst)?;
        #[cfg(not(unix))]
        fs::copy(src, dst)?;
        return Ok(());
    }
    fs::copy(src, dst)?;
    Ok(())
}

/// Move a file, falling back to copy + remove when a rename is not possible
/// (e.g. across filesystems).
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_file(src, dst)?;
    fs::remove_file(src)
}

/// Write `bytes` to `path` atomically (temp file in the same directory, then rename).
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Whether `path` has any execute bit set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Whether `path` has any execute bit set.
#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Set unix permission bits; a no-op elsewhere.
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Reject relative paths that are absolute or climb out of their root.
pub fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_skips_excluded_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join(".git/objects/x"), "").unwrap();
        fs::write(root.join("bin/tool"), "").unwrap();
        fs::write(root.join("README"), "").unwrap();

        let files = walk_files(root, &[".git".to_string()]).unwrap();
        let rels: Vec<String> = files.iter().map(|f| rel_string(&f.relative)).collect();
        assert_eq!(rels, vec!["README", "bin/tool"]);
    }

    #[test]
    fn test_move_and_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a");
        fs::write(&src, "x").unwrap();
        copy_file(&src, &tmp.path().join("b/c")).unwrap();
        move_file(&src, &tmp.path().join("d/e")).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(tmp.path().join("b/c")).unwrap(), "x");
        assert_eq!(fs::read_to_string(tmp.path().join("d/e")).unwrap(), "x");
    }

    #[test]
    fn test_safe_relative() {
        assert!(is_safe_relative(Path::new("bin/tool")));
        assert!(!is_safe_relative(Path::new("../etc/passwd")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
        assert!(!is_safe_relative(Path::new("")));
    }
}
