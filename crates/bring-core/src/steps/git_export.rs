use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::context::BringContext;
use crate::error::StepError;
use crate::io::extract::extract_tar;
use crate::io::process::run_tool;

/// Export a ref of a git repository through a cached bare mirror.
pub struct GitExport;

/// Location of the bare mirror for `url`.
pub fn mirror_path(bring: &BringContext, url: &str) -> PathBuf {
    let hash = blake3::hash(url.as_bytes()).to_hex();
    bring.config.git_dir().join(&hash.as_str()[..16])
}

async fn ref_exists(mirror: &Path, git_ref: &str) -> bool {
    let spec = format!("{git_ref}^{{commit}}");
    run_tool("git", ["rev-parse", "--verify", "--quiet", spec.as_str()], Some(mirror))
        .await
        .is_ok()
}

/// Whether `git_ref` names something that can move upstream: a branch or `HEAD`.
async fn is_moving_ref(mirror: &Path, git_ref: &str) -> bool {
    if git_ref == "HEAD" {
        return true;
    }
    let branch = format!("refs/heads/{git_ref}");
    run_tool("git", ["show-ref", "--verify", "--quiet", branch.as_str()], Some(mirror))
        .await
        .is_ok()
}

/// Ensure the mirror exists and has an up to date `git_ref`. Branches are
/// always refreshed; tags and commits are fetched only when missing.
async fn ensure_mirror(bring: &BringContext, url: &str, git_ref: &str) -> Result<PathBuf, StepError> {
    let mirror = mirror_path(bring, url);
    let _guard = bring.git_locks.lock(url).await;

    if !mirror.join("HEAD").exists() {
        info!(url, "cloning mirror");
        if let Some(parent) = mirror.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if mirror.exists() {
            tokio::fs::remove_dir_all(&mirror).await?;
        }
        let dest = mirror.to_string_lossy().into_owned();
        run_tool("git", ["clone", "--mirror", "--quiet", url, dest.as_str()], None).await?;
    } else if is_moving_ref(&mirror, git_ref).await {
        debug!(url, git_ref, "refreshing branch");
        run_tool("git", ["remote", "update", "--prune"], Some(&mirror)).await?;
    } else if !ref_exists(&mirror, git_ref).await {
        debug!(url, git_ref, "ref not in mirror, fetching");
        run_tool("git", ["remote", "update", "--prune"], Some(&mirror)).await?;
    }
    Ok(mirror)
}

#[async_trait]
impl Step for GitExport {
    fn kind(&self) -> &'static str {
        "git_export"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("url", ValueKind::String),
            Port::required("ref", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let url = inputs.str("url")?;
        let git_ref = inputs.str("ref")?;
        let mirror = ensure_mirror(ctx.bring, &url, &git_ref).await?;

        let tarball = ctx.work_dir.join("export.tar");
        let output_arg = format!("--output={}", tarball.display());
        run_tool(
            "git",
            ["archive", "--format=tar", output_arg.as_str(), git_ref.as_str()],
            Some(&mirror),
        )
        .await?;

        let tree = ctx.work_dir.join("tree");
        let tar_path = tarball.clone();
        let dest = tree.clone();
        tokio::task::spawn_blocking(move || {
            let file = File::open(&tar_path)?;
            extract_tar(BufReader::new(file), &dest)
        })
        .await
        .map_err(|e| StepError::Other(format!("export task failed: {e}")))??;
        tokio::fs::remove_file(&tarball).await?;

        Ok(output("folder_path", path_value(&tree)))
    }
}
