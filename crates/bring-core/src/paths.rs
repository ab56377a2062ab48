use dirs::home_dir;
use std::path::PathBuf;

/// Returns the bring home directory, or None if the user's home cannot be resolved.
pub fn try_bring_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("BRING_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".bring"))
}

/// Returns the bring home directory (`~/.bring`), falling back to `./.bring`
/// when no home directory can be determined.
pub fn bring_home() -> PathBuf {
    try_bring_home().unwrap_or_else(|| PathBuf::from(".bring"))
}

/// Extract the filename from a URL, ignoring any query string or fragment.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').split('/').next_back().unwrap_or("")
}

/// Directories never copied out of a source tree.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", "__pycache__", ".bring"];

/// Entries produced by archivers that are never meaningful content.
pub const ARCHIVE_NOISE: &[&str] = &[".DS_Store", "__MACOSX"];
