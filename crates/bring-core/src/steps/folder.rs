use async_trait::async_trait;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::copy_tree;
use crate::paths::VCS_DIRS;

/// Copy a local folder into a run-owned directory, leaving VCS metadata behind.
pub struct Folder;

#[async_trait]
impl Step for Folder {
    fn kind(&self) -> &'static str {
        "folder"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("path", ValueKind::Path)];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let src = inputs.path("path")?;
        if !src.is_dir() {
            return Err(StepError::input(
                "path",
                format!("{} is not a directory", src.display()),
            ));
        }
        let dest = ctx.work_dir.join("folder");
        let copy_dest = dest.clone();
        tokio::task::spawn_blocking(move || copy_tree(&src, &copy_dest, VCS_DIRS))
            .await
            .map_err(|e| StepError::Other(format!("copy task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}
