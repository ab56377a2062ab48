//! Archive extraction module
//!
//! Handles tar.zst, tar.gz, tar and zip archives. Anything else is treated as
//! a raw file and copied as-is.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use crate::paths::ARCHIVE_NOISE;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    /// The archive's top level is not a single directory, and the caller did
    /// not say whether to strip it.
    #[error("cannot decide on an archive root: {entries} top-level entries")]
    AmbiguousRoot { entries: usize },

    /// `remove_root = true` but the archive has no single root directory.
    #[error("remove_root requested but the archive has {entries} top-level entries")]
    NoSingleRoot { entries: usize },
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarZst,
    TarGz,
    Tar,
    Zip,
    /// Not an archive: copied verbatim.
    Raw,
}

/// Detect archive format from file extension
pub fn detect_format(path: &Path) -> ArchiveFormat {
    let path_str = path.to_string_lossy().to_lowercase();

    if path_str.ends_with(".tar.zst") || path_str.ends_with(".tzst") {
        ArchiveFormat::TarZst
    } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if path_str.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if path_str.ends_with(".zip") {
        ArchiveFormat::Zip
    } else {
        ArchiveFormat::Raw
    }
}

/// Extract a tar.zst archive to a destination directory
pub fn extract_tar_zst(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let reader = BufReader::new(file);
    let zstd_decoder = ZstdDecoder::new(reader)?;

    extract_tar(zstd_decoder, dest_dir)
}

/// Extract a tar.gz archive to a destination directory
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let reader = BufReader::new(file);
    let gz_decoder = flate2::read::GzDecoder::new(reader);

    extract_tar(gz_decoder, dest_dir)
}

/// Extract a tar archive from a reader
pub fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        // unpack_in refuses entries that would escape dest_dir
        if !entry.unpack_in(dest_dir)? {
            let path = entry.path()?.display().to_string();
            return Err(ExtractError::Archive(format!("Invalid path in archive: {path}")));
        }
    }

    Ok(())
}

/// Extract a zip archive
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };

        if file.is_dir() {
            fs::create_dir_all(dest_dir.join(&relative_path))?;
            continue;
        }

        let absolute_path = dest_dir.join(&relative_path);
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

/// Copy a non-archive file into `dest_dir` and mark it executable.
pub fn extract_raw(path: &Path, dest_dir: &Path, name: Option<&str>) -> Result<PathBuf, ExtractError> {
    fs::create_dir_all(dest_dir)?;
    let filename = match name {
        Some(n) => n.into(),
        None => path
            .file_name()
            .ok_or_else(|| ExtractError::Archive("Invalid filename".to_string()))?
            .to_os_string(),
    };
    let dest_path = dest_dir.join(filename);
    fs::copy(path, &dest_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(dest_path)
}

/// Extract an archive, auto-detecting format. Raw files are copied under
/// `raw_name` (or their own name).
pub fn extract_auto(
    archive_path: &Path,
    dest_dir: &Path,
    raw_name: Option<&str>,
) -> Result<ArchiveFormat, ExtractError> {
    let format = detect_format(archive_path);
    match format {
        ArchiveFormat::TarZst => extract_tar_zst(archive_path, dest_dir)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive_path, dest_dir)?,
        ArchiveFormat::Tar => {
            let file = File::open(archive_path)?;
            extract_tar(BufReader::new(file), dest_dir)?;
        }
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir)?,
        ArchiveFormat::Raw => {
            extract_raw(archive_path, dest_dir, raw_name)?;
        }
    }
    Ok(format)
}

/// Decide which directory holds the archive's content.
///
/// * `Some(true)`: the single top-level directory, or an error.
/// * `Some(false)`: `dir` itself.
/// * `None`: a single top-level directory is stripped, a single top-level file
///   is kept; zero or several top-level entries are ambiguous.
///
/// Archiver noise (`.DS_Store`, `__MACOSX`) at the top level is removed first.
pub fn resolve_root(dir: &Path, remove_root: Option<bool>) -> Result<PathBuf, ExtractError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if ARCHIVE_NOISE.iter().any(|n| name == *n) {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            continue;
        }
        entries.push(entry);
    }

    let single_dir = match entries.as_slice() {
        [only] if only.file_type()?.is_dir() => Some(only.path()),
        _ => None,
    };

    match remove_root {
        Some(false) => Ok(dir.to_path_buf()),
        Some(true) => single_dir.ok_or(ExtractError::NoSingleRoot {
            entries: entries.len(),
        }),
        None => match (single_dir, entries.len()) {
            (Some(root), _) => Ok(root),
            (None, 1) => Ok(dir.to_path_buf()),
            (None, n) => Err(ExtractError::AmbiguousRoot { entries: n }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.tar.gz")), ArchiveFormat::TarGz);
        assert_eq!(detect_format(Path::new("a.TGZ")), ArchiveFormat::TarGz);
        assert_eq!(detect_format(Path::new("a.tar.zst")), ArchiveFormat::TarZst);
        assert_eq!(detect_format(Path::new("a.zip")), ArchiveFormat::Zip);
        assert_eq!(detect_format(Path::new("kubectl")), ArchiveFormat::Raw);
    }

    #[test]
    fn test_single_root_is_stripped_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tool.tar.gz");
        write_tar_gz(&archive, &[("tool-1.0/bin/tool", "x"), ("tool-1.0/README", "r")]);

        let out = tmp.path().join("out");
        extract_auto(&archive, &out, None).unwrap();
        let root = resolve_root(&out, None).unwrap();
        assert_eq!(root, out.join("tool-1.0"));
        assert!(root.join("bin/tool").exists());
    }

    #[test]
    fn test_two_top_level_entries_are_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("multi.tar.gz");
        write_tar_gz(&archive, &[("a/x", "1"), ("b/y", "2")]);

        let out = tmp.path().join("out");
        extract_auto(&archive, &out, None).unwrap();
        let err = resolve_root(&out, None).unwrap_err();
        assert!(matches!(err, ExtractError::AmbiguousRoot { entries: 2 }));

        assert_eq!(resolve_root(&out, Some(false)).unwrap(), out);
        assert!(matches!(
            resolve_root(&out, Some(true)).unwrap_err(),
            ExtractError::NoSingleRoot { entries: 2 }
        ));
    }

    #[test]
    fn test_empty_archive_is_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        assert!(matches!(
            resolve_root(&out, None).unwrap_err(),
            ExtractError::AmbiguousRoot { entries: 0 }
        ));
    }

    #[test]
    fn test_noise_entries_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(out.join("pkg")).unwrap();
        fs::create_dir_all(out.join("__MACOSX")).unwrap();
        fs::write(out.join(".DS_Store"), "").unwrap();

        assert_eq!(resolve_root(&out, None).unwrap(), out.join("pkg"));
        assert!(!out.join("__MACOSX").exists());
    }

    #[test]
    fn test_zip_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("t.zip");
        {
            let file = File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options: zip::write::SimpleFileOptions = zip::write::SimpleFileOptions::default();
            zip.start_file("only.txt", options).unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }
        let out = tmp.path().join("out");
        extract_auto(&archive, &out, None).unwrap();
        // a single top-level file stays where it is
        assert_eq!(resolve_root(&out, None).unwrap(), out);
        assert_eq!(fs::read_to_string(out.join("only.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_raw_file_is_copied_and_renamed() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("kubectl-linux-amd64");
        fs::write(&raw, "#!/bin/sh").unwrap();
        let out = tmp.path().join("out");
        let format = extract_auto(&raw, &out, Some("kubectl")).unwrap();
        assert_eq!(format, ArchiveFormat::Raw);
        assert!(out.join("kubectl").exists());
    }
}
