use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single URL → artifact mapping persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedArtifact {
    /// Where the fetched artifact lives.
    pub path: PathBuf,
    /// When it was fetched.
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UrlCacheFile {
    #[serde(default)]
    entries: BTreeMap<String, CachedArtifact>,
}

/// Persistent map of URLs to already-fetched artifact paths.
///
/// Shared by every package, so two packages referencing the same URL reuse
/// one download. Stored as JSON under `$BRING_HOME/cache/urls.json`.
#[derive(Debug)]
pub struct UrlCache {
    path: PathBuf,
    inner: Mutex<Option<UrlCacheFile>>,
}

impl UrlCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(None),
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut UrlCacheFile) -> T) -> T {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = guard.get_or_insert_with(|| load(&self.path));
        f(file)
    }

    /// Look up a previously fetched artifact that still exists on disk.
    pub fn get(&self, url: &str) -> Option<PathBuf> {
        self.with_file(|file| {
            file.entries
                .get(url)
                .map(|e| e.path.clone())
                .filter(|p| p.exists())
        })
    }

    /// Record a fetched artifact and persist the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file cannot be written.
    pub fn insert(&self, url: &str, path: &Path) -> std::io::Result<()> {
        self.with_file(|file| {
            file.entries.insert(
                url.to_string(),
                CachedArtifact {
                    path: path.to_path_buf(),
                    fetched_at: Utc::now(),
                },
            );
            save(&self.path, file)
        })
    }
}

fn load(path: &Path) -> UrlCacheFile {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable url cache");
            UrlCacheFile::default()
        }),
        Err(_) => UrlCacheFile::default(),
    }
}

fn save(path: &Path, file: &UrlCacheFile) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let content = serde_json::to_vec_pretty(file).map_err(std::io::Error::other)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("a.tar.gz");
        fs::write(&artifact, "x").unwrap();
        let cache_path = tmp.path().join("cache/urls.json");

        UrlCache::new(&cache_path).insert("https://x/a.tar.gz", &artifact).unwrap();

        let reloaded = UrlCache::new(&cache_path);
        assert_eq!(reloaded.get("https://x/a.tar.gz"), Some(artifact.clone()));
        assert_eq!(reloaded.get("https://x/other"), None);
    }

    #[test]
    fn test_missing_artifact_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = UrlCache::new(tmp.path().join("urls.json"));
        cache.insert("u", &tmp.path().join("gone")).unwrap();
        assert_eq!(cache.get("u"), None);
    }
}
