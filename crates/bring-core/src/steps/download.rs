//! `download` and `download_multiple`: fetch URLs through the shared download cache.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use bring_schema::ContentHash;
use futures::StreamExt;
use tracing::{debug, warn};

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::context::BringContext;
use crate::error::StepError;
use crate::io::download::{DownloadRequest, cache_location};
use crate::io::fs::copy_file;

/// Fetch `url`, reusing an earlier download of the same URL when possible.
/// Concurrent fetches of one URL wait for each other instead of racing on
/// the same cache file.
pub(crate) async fn fetch(
    bring: &BringContext,
    url: &str,
    file_name: Option<&str>,
    sha256: Option<&str>,
) -> Result<PathBuf, StepError> {
    let _guard = bring.download_locks.lock(url).await;
    if let Some(cached) = bring.urls.get(url) {
        if matches_hash(&cached, sha256) {
            debug!(url, path = %cached.display(), "reusing cached download");
            return Ok(cached);
        }
    }

    let dest = cache_location(&bring.config.download_dir(), url, file_name);
    if dest.exists() && !matches_hash(&dest, sha256) {
        tokio::fs::remove_file(&dest).await?;
    }
    let path = DownloadRequest {
        client: &bring.client,
        url,
        dest: &dest,
        expected_hash: sha256,
        attempts: bring.config.download_retries,
        retry_delay: bring.config.retry_delay,
        reporter: &*bring.reporter,
    }
    .execute()
    .await?;

    if let Err(e) = bring.urls.insert(url, &path) {
        warn!(url, error = %e, "failed to record download in url cache");
    }
    Ok(path)
}

fn matches_hash(path: &std::path::Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    ContentHash::of_file(path)
        .map(|h| h.as_str().eq_ignore_ascii_case(expected.trim_start_matches("sha256:")))
        .unwrap_or(false)
}

/// Download a single file.
pub struct Download;

#[async_trait]
impl Step for Download {
    fn kind(&self) -> &'static str {
        "download"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("url", ValueKind::String),
            Port::optional("target_file", ValueKind::String),
            Port::optional("sha256", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("file_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let url = inputs.str("url")?;
        let target_file = inputs.opt_str("target_file")?;
        let sha256 = inputs.opt_str("sha256")?;
        let path = fetch(ctx.bring, &url, target_file.as_deref(), sha256.as_deref()).await?;
        Ok(output("file_path", path_value(&path)))
    }
}

/// Download several files side by side into one folder.
pub struct DownloadMultiple;

#[async_trait]
impl Step for DownloadMultiple {
    fn kind(&self) -> &'static str {
        "download_multiple"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("urls", ValueKind::List)];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let urls = inputs.str_list("urls")?;
        let mut seen = HashSet::new();
        for url in &urls {
            let name = crate::filename_from_url(url);
            if name.is_empty() || !seen.insert(name) {
                return Err(StepError::input(
                    "urls",
                    format!("'{url}' does not have a unique file name"),
                ));
            }
        }

        let dest_dir = ctx.work_dir.join("files");
        tokio::fs::create_dir_all(&dest_dir).await?;
        let downloads: Vec<_> = urls
            .iter()
            .map(|url| {
                let dest_dir = &dest_dir;
                async move {
                    let path = fetch(ctx.bring, url, None, None).await?;
                    copy_file(&path, &dest_dir.join(crate::filename_from_url(url)))?;
                    Ok(())
                }
            })
            .collect();
        let results: Vec<Result<(), StepError>> = futures::stream::iter(downloads)
            .buffer_unordered(ctx.bring.config.parallelism.max(1))
            .collect()
            .await;
        results.into_iter().collect::<Result<Vec<()>, _>>()?;

        Ok(output("folder_path", path_value(&dest_dir)))
    }
}
