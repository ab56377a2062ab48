//! Runtime configuration gathered from defaults and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BringError, Result};
use crate::paths::bring_home;

/// Default metadata freshness window: one day.
pub const DEFAULT_METADATA_MAX_AGE: i64 = 86_400;
/// Default task-group width.
pub const DEFAULT_PARALLELISM: usize = 4;
/// Default number of download attempts.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;
/// Default delay between download attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// Default per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Public GitHub API.
pub const GITHUB_API: &str = "https://api.github.com";
/// Public GitLab API.
pub const GITLAB_API: &str = "https://gitlab.com/api/v4";
/// Raw file host for GitHub repositories.
pub const GITHUB_RAW: &str = "https://raw.githubusercontent.com";

/// All tunables, resolved once at startup and carried by the context.
#[derive(Debug, Clone)]
pub struct BringConfig {
    /// Base directory for caches, workspaces and indexes.
    pub home: PathBuf,
    /// Metadata freshness window in seconds (0 = always refresh, negative = never expire).
    pub metadata_max_age: i64,
    /// Width of task groups and nested pipeline fan-out.
    pub parallelism: usize,
    /// Download attempts per URL.
    pub download_retries: u32,
    /// Fixed delay between download attempts.
    pub retry_delay: Duration,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
    /// Optional GitHub API token.
    pub github_token: Option<String>,
    /// Optional GitLab API token.
    pub gitlab_token: Option<String>,
    /// GitHub API base URL.
    pub github_api: String,
    /// GitLab API base URL.
    pub gitlab_api: String,
    /// Base URL for raw GitHub file downloads.
    pub github_raw: String,
}

impl Default for BringConfig {
    fn default() -> Self {
        Self::with_home(bring_home())
    }
}

impl BringConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            metadata_max_age: DEFAULT_METADATA_MAX_AGE,
            parallelism: DEFAULT_PARALLELISM,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            github_token: None,
            gitlab_token: None,
            github_api: GITHUB_API.to_string(),
            gitlab_api: GITLAB_API.to_string(),
            github_raw: GITHUB_RAW.to_string(),
        }
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] if a numeric variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("BRING_HOME").map_or_else(bring_home, PathBuf::from);
        let mut config = Self::with_home(home);

        if let Some(v) = lookup("BRING_METADATA_MAX_AGE") {
            config.metadata_max_age = parse_var("BRING_METADATA_MAX_AGE", &v)?;
        }
        if let Some(v) = lookup("BRING_PARALLELISM") {
            config.parallelism = parse_var::<usize>("BRING_PARALLELISM", &v)?.max(1);
        }
        if let Some(v) = lookup("BRING_DOWNLOAD_RETRIES") {
            config.download_retries = parse_var::<u32>("BRING_DOWNLOAD_RETRIES", &v)?.max(1);
        }
        if let Some(v) = lookup("BRING_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse_var("BRING_RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("BRING_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_var("BRING_REQUEST_TIMEOUT_SECS", &v)?);
        }
        config.github_token = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty());
        config.gitlab_token = lookup("GITLAB_TOKEN").filter(|t| !t.is_empty());
        if let Some(v) = lookup("BRING_GITHUB_API") {
            config.github_api = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("BRING_GITLAB_API") {
            config.gitlab_api = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("BRING_GITHUB_RAW") {
            config.github_raw = v.trim_end_matches('/').to_string();
        }
        Ok(config)
    }

    /// Cache root: `$BRING_HOME/cache`
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Metadata cache for one resolver kind: `$BRING_HOME/cache/metadata/<kind>`
    pub fn metadata_dir(&self, resolver_kind: &str) -> PathBuf {
        self.cache_dir().join("metadata").join(resolver_kind)
    }

    /// Download cache: `$BRING_HOME/cache/downloads`
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir().join("downloads")
    }

    /// Bare git mirrors: `$BRING_HOME/cache/git`
    pub fn git_dir(&self) -> PathBuf {
        self.cache_dir().join("git")
    }

    /// URL → artifact path store: `$BRING_HOME/cache/urls.json`
    pub fn url_cache_path(&self) -> PathBuf {
        self.cache_dir().join("urls.json")
    }

    /// Step working directories: `$BRING_HOME/workspace`
    pub fn workspace_dir(&self) -> PathBuf {
        self.home.join("workspace")
    }

    /// Default package indexes: `$BRING_HOME/indexes`
    pub fn index_dir(&self) -> PathBuf {
        self.home.join("indexes")
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BringError::Config(format!("{key}: invalid value '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BringConfig::from_lookup(lookup(&[("BRING_HOME", "/tmp/bh")])).unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/bh"));
        assert_eq!(config.metadata_max_age, 86_400);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.download_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(
            config.metadata_dir("git"),
            PathBuf::from("/tmp/bh/cache/metadata/git")
        );
    }

    #[test]
    fn test_overrides() {
        let config = BringConfig::from_lookup(lookup(&[
            ("BRING_HOME", "/h"),
            ("BRING_METADATA_MAX_AGE", "-1"),
            ("BRING_PARALLELISM", "0"),
            ("BRING_GITHUB_API", "http://127.0.0.1:1234/"),
            ("GITHUB_TOKEN", ""),
        ]))
        .unwrap();
        assert_eq!(config.metadata_max_age, -1);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.github_api, "http://127.0.0.1:1234");
        assert!(config.github_token.is_none());
    }

    #[test]
    fn test_invalid_number() {
        let err = BringConfig::from_lookup(lookup(&[("BRING_PARALLELISM", "many")])).unwrap_err();
        assert!(matches!(err, BringError::Config(_)));
    }
}
