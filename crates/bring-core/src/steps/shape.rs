//! Steps that reshape a file tree: `merge_folders`, `pick_subfolder` and `flatten`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::{copy_file, is_safe_relative, rel_string, walk_files};
use crate::paths::VCS_DIRS;

/// Copy every file of `sources` into `dest`; later sources win.
pub(crate) fn merge_trees(dest: &Path, sources: &[PathBuf], flatten: bool) -> Result<usize, StepError> {
    std::fs::create_dir_all(dest)?;
    let mut count = 0;
    for src in sources {
        if !src.is_dir() {
            return Err(StepError::input(
                "folder_paths",
                format!("{} is not a directory", src.display()),
            ));
        }
        for file in walk_files(src, VCS_DIRS)? {
            let relative = if flatten {
                PathBuf::from(file.relative.file_name().unwrap_or_default())
            } else {
                file.relative
            };
            copy_file(&file.absolute, &dest.join(relative))?;
            count += 1;
        }
    }
    Ok(count)
}

pub struct MergeFolders;

#[async_trait]
impl Step for MergeFolders {
    fn kind(&self) -> &'static str {
        "merge_folders"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_paths", ValueKind::List),
            Port::optional("flatten", ValueKind::Bool),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let sources: Vec<PathBuf> = inputs
            .str_list("folder_paths")?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let flatten = inputs.bool_or("flatten", false)?;
        let dest = ctx.work_dir.join("merged");
        let task_dest = dest.clone();
        tokio::task::spawn_blocking(move || merge_trees(&task_dest, &sources, flatten))
            .await
            .map_err(|e| StepError::Other(format!("merge task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}

pub struct PickSubfolder;

#[async_trait]
impl Step for PickSubfolder {
    fn kind(&self) -> &'static str {
        "pick_subfolder"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::required("subfolder", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, _ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let root = inputs.path("folder_path")?;
        let subfolder = inputs.str("subfolder")?;
        if !is_safe_relative(Path::new(&subfolder)) {
            return Err(StepError::input("subfolder", format!("'{subfolder}' escapes the folder")));
        }
        let picked = root.join(&subfolder);
        if !picked.is_dir() {
            return Err(StepError::input(
                "subfolder",
                format!("'{subfolder}' does not exist in {}", root.display()),
            ));
        }
        Ok(output("folder_path", path_value(&picked)))
    }
}

/// Move every file to the top level. Two files sharing a basename is an error.
pub struct Flatten;

#[async_trait]
impl Step for Flatten {
    fn kind(&self) -> &'static str {
        "flatten"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let src = inputs.path("folder_path")?;
        let dest = ctx.work_dir.join("flat");
        let task_dest = dest.clone();
        tokio::task::spawn_blocking(move || flatten_tree(&src, &task_dest))
            .await
            .map_err(|e| StepError::Other(format!("flatten task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}

fn flatten_tree(src: &Path, dest: &Path) -> Result<(), StepError> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    let files = walk_files(src, VCS_DIRS)?;
    for file in &files {
        let name = file
            .relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(first) = seen.insert(name.clone(), rel_string(&file.relative)) {
            return Err(StepError::Validation(format!(
                "cannot flatten: '{first}' and '{}' share the name '{name}'",
                rel_string(&file.relative)
            )));
        }
    }
    std::fs::create_dir_all(dest)?;
    for file in &files {
        copy_file(&file.absolute, &dest.join(file.relative.file_name().unwrap_or_default()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_flatten_rejects_duplicate_basenames() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("a")).unwrap();
        fs::create_dir_all(src.join("b")).unwrap();
        fs::write(src.join("a/tool"), "1").unwrap();
        fs::write(src.join("b/tool"), "2").unwrap();

        let err = flatten_tree(&src, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn test_merge_trees_later_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(a.join("bin")).unwrap();
        fs::create_dir_all(b.join("bin")).unwrap();
        fs::write(a.join("bin/x"), "from-a").unwrap();
        fs::write(a.join("only-a"), "a").unwrap();
        fs::write(b.join("bin/x"), "from-b").unwrap();

        let out = tmp.path().join("out");
        let count = merge_trees(&out, &[a, b], false).unwrap();
        assert_eq!(count, 3);
        assert_eq!(fs::read_to_string(out.join("bin/x")).unwrap(), "from-b");
        assert!(out.join("only-a").exists());
    }
}
