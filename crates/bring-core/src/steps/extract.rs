use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::extract::{extract_auto, resolve_root};

/// Unpack an archive (or adopt a raw file) into the working directory.
pub struct Extract;

#[async_trait]
impl Step for Extract {
    fn kind(&self) -> &'static str {
        "extract"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("file_path", ValueKind::Path),
            Port::optional("remove_root", ValueKind::Bool),
            Port::optional("target_name", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let archive = inputs.path("file_path")?;
        let remove_root = inputs.opt_bool("remove_root")?;
        let target_name = inputs.opt_str("target_name")?;
        let dest = ctx.work_dir.join("content");

        let root: PathBuf = tokio::task::spawn_blocking(move || {
            let format = extract_auto(&archive, &dest, target_name.as_deref())?;
            debug!(archive = %archive.display(), ?format, "extracted");
            resolve_root(&dest, remove_root)
        })
        .await
        .map_err(|e| StepError::Other(format!("extraction task failed: {e}")))??;

        Ok(output("folder_path", path_value(&root)))
    }
}
