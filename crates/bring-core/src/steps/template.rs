use std::path::Path;

use async_trait::async_trait;
use bring_schema::Vars;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::{copy_file, walk_files};
use crate::paths::VCS_DIRS;
use crate::template::render_str;

/// Render `{{ name }}` placeholders in the files of a folder.
///
/// With a `suffix`, only files ending in it are rendered (and lose the
/// suffix); every other file is copied untouched. Without one, every UTF-8
/// file is rendered.
pub struct Template;

fn render_tree(src: &Path, dest: &Path, vars: &Vars, suffix: Option<&str>) -> Result<usize, StepError> {
    let mut rendered = 0;
    for file in walk_files(src, VCS_DIRS)? {
        let name = file.relative.to_string_lossy().into_owned();
        let (target, render) = match suffix {
            Some(sfx) => match name.strip_suffix(sfx) {
                Some(stripped) if !stripped.is_empty() => (dest.join(stripped), true),
                _ => (dest.join(&file.relative), false),
            },
            None => (dest.join(&file.relative), true),
        };

        let text = if render && !file.absolute.is_symlink() {
            std::fs::read(&file.absolute)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        } else {
            None
        };
        match text {
            Some(text) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, render_str(&text, vars)?)?;
                let perms = std::fs::metadata(&file.absolute)?.permissions();
                std::fs::set_permissions(&target, perms)?;
                rendered += 1;
            }
            None => copy_file(&file.absolute, &target)?,
        }
    }
    Ok(rendered)
}

#[async_trait]
impl Step for Template {
    fn kind(&self) -> &'static str {
        "template"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::optional("vars", ValueKind::Map),
            Port::optional("suffix", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let src = inputs.path("folder_path")?;
        let suffix = inputs.opt_str("suffix")?;
        let mut vars = ctx.vars.clone();
        vars.extend(inputs.map("vars")?);

        let dest = ctx.work_dir.join("rendered");
        let task_dest = dest.clone();
        tokio::task::spawn_blocking(move || render_tree(&src, &task_dest, &vars, suffix.as_deref()))
            .await
            .map_err(|e| StepError::Other(format!("template task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}
