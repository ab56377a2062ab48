use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bring_schema::{PkgVersion, SourceDescription, StepSpec, Vars};
use serde::Deserialize;

use super::{Resolved, Resolver, fields};
use crate::context::BringContext;

#[derive(Debug, Deserialize)]
struct FolderSource {
    path: PathBuf,
}

/// A local folder: exactly one version, no variables.
pub struct FolderResolver;

#[async_trait]
impl Resolver for FolderResolver {
    fn kind(&self) -> &'static str {
        "folder"
    }

    async fn resolve(&self, _ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: FolderSource = fields(source)?;
        if !cfg.path.is_dir() {
            bail!("{} is not a directory", cfg.path.display());
        }
        let step = StepSpec::new("folder").with("path", cfg.path.to_string_lossy().into_owned());
        Ok(Resolved::new(vec![PkgVersion::new(Vars::new(), vec![step])]))
    }
}
