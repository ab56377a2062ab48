use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bring_schema::scalar_to_string;
use glob::Pattern;
use serde_json::Value;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::{copy_file, is_safe_relative, rel_string, set_mode, walk_files};
use crate::paths::VCS_DIRS;

/// File selection, renaming and mode setting.
pub struct Transform;

#[derive(Debug, Default)]
struct Rules {
    include: Vec<Pattern>,
    rename: BTreeMap<String, String>,
    mode: Vec<(Pattern, u32)>,
    flatten: bool,
}

fn compile(name: &str, pattern: &str) -> Result<Pattern, StepError> {
    Pattern::new(pattern).map_err(|e| StepError::input(name, format!("bad glob '{pattern}': {e}")))
}

fn parse_mode(value: &Value) -> Result<u32, StepError> {
    let text = scalar_to_string(value);
    u32::from_str_radix(text.trim_start_matches("0o"), 8)
        .map_err(|_| StepError::input("mode", format!("'{text}' is not an octal mode")))
}

impl Rules {
    fn from_inputs(inputs: &Inputs) -> Result<Self, StepError> {
        let include = inputs
            .str_list("include")?
            .iter()
            .map(|p| compile("include", p))
            .collect::<Result<_, _>>()?;
        let rename = inputs
            .map("rename")?
            .into_iter()
            .map(|(from, to)| (from, scalar_to_string(&to)))
            .collect();
        let mode = inputs
            .map("mode")?
            .iter()
            .map(|(pattern, mode)| Ok((compile("mode", pattern)?, parse_mode(mode)?)))
            .collect::<Result<_, StepError>>()?;
        Ok(Self {
            include,
            rename,
            mode,
            flatten: inputs.bool_or("flatten", false)?,
        })
    }

    fn selects(&self, relative: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|p| p.matches(relative))
    }

    fn destination(&self, relative: &Path) -> Result<String, StepError> {
        let mut dest = if self.flatten {
            relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            rel_string(relative)
        };
        if let Some(renamed) = self.rename.get(&dest) {
            if !is_safe_relative(Path::new(renamed)) {
                return Err(StepError::input("rename", format!("'{renamed}' escapes the folder")));
            }
            dest = renamed.clone();
        }
        Ok(dest)
    }
}

fn apply(src: &Path, dest: &Path, rules: &Rules) -> Result<usize, StepError> {
    let mut planned: BTreeMap<String, PathBuf> = BTreeMap::new();
    for file in walk_files(src, VCS_DIRS)? {
        if !rules.selects(&rel_string(&file.relative)) {
            continue;
        }
        let target = rules.destination(&file.relative)?;
        if let Some(previous) = planned.insert(target.clone(), file.absolute.clone()) {
            return Err(StepError::Validation(format!(
                "'{}' and '{}' both map to '{target}'",
                previous.display(),
                file.absolute.display()
            )));
        }
    }
    if planned.is_empty() && !rules.include.is_empty() {
        return Err(StepError::Validation("no files matched the include patterns".to_string()));
    }

    std::fs::create_dir_all(dest)?;
    for (relative, absolute) in &planned {
        let out = dest.join(relative);
        copy_file(absolute, &out)?;
        if let Some((_, mode)) = rules.mode.iter().find(|(p, _)| p.matches(relative)) {
            set_mode(&out, *mode)?;
        }
    }
    Ok(planned.len())
}

#[async_trait]
impl Step for Transform {
    fn kind(&self) -> &'static str {
        "transform"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::optional("include", ValueKind::List),
            Port::optional("rename", ValueKind::Map),
            Port::optional("mode", ValueKind::Map),
            Port::optional("flatten", ValueKind::Bool),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let rules = Rules::from_inputs(inputs)?;
        let src = inputs.path("folder_path")?;
        let dest = ctx.work_dir.join("transformed");
        let task_dest = dest.clone();
        tokio::task::spawn_blocking(move || apply(&src, &task_dest, &rules))
            .await
            .map_err(|e| StepError::Other(format!("transform task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::fs;

    fn rules_from(map: Map<String, Value>) -> Result<Rules, StepError> {
        Rules::from_inputs(&Inputs::new(&Default::default(), &map))
    }

    fn tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::create_dir_all(src.join("doc")).unwrap();
        fs::write(src.join("bin/tool"), "#!/bin/sh").unwrap();
        fs::write(src.join("doc/README.md"), "docs").unwrap();
        fs::write(src.join("LICENSE"), "mit").unwrap();
        tmp
    }

    #[test]
    fn test_include_rename_and_flatten() {
        let tmp = tree();
        let rules = rules_from(
            json!({
                "include": ["bin/*", "LICENSE"],
                "rename": {"tool": "mytool"},
                "mode": {"mytool": "755"},
                "flatten": true,
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .unwrap();

        let out = tmp.path().join("out");
        assert_eq!(apply(&tmp.path().join("src"), &out, &rules).unwrap(), 2);
        assert!(out.join("mytool").exists());
        assert!(out.join("LICENSE").exists());
        assert!(!out.join("README.md").exists());
        #[cfg(unix)]
        assert!(crate::io::fs::is_executable(&out.join("mytool")));
    }

    #[test]
    fn test_include_matching_nothing_fails() {
        let tmp = tree();
        let rules = rules_from(json!({"include": ["*.exe"]}).as_object().unwrap().clone()).unwrap();
        let err = apply(&tmp.path().join("src"), &tmp.path().join("out"), &rules).unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
    }

    #[test]
    fn test_bad_mode_is_an_input_error() {
        let err = rules_from(json!({"mode": {"*": "rwx"}}).as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, StepError::Input { .. }));
    }
}
