//! Deep-merge a structured patch into a JSON, YAML or TOML document.
//!
//! # Merge rules
//!
//! - Objects are merged recursively
//! - Arrays and scalars in the patch replace the original
//! - `null` in the patch deletes the key

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::{copy_tree, is_safe_relative};
use crate::paths::VCS_DIRS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn parse(name: &str) -> Result<Self, StepError> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(StepError::input("format", format!("unsupported format '{other}'"))),
        }
    }

    fn detect(file: &str) -> Result<Self, StepError> {
        let ext = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::parse(ext).map_err(|_| {
            StepError::input("format", format!("cannot infer the format of '{file}', set it explicitly"))
        })
    }

    fn load(self, text: &str) -> Result<Value, StepError> {
        let parsed = match self {
            Self::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| StepError::Other(format!("failed to parse {self:?} document: {e}")))
    }

    fn dump(self, value: &Value) -> Result<String, StepError> {
        let rendered = match self {
            Self::Json => serde_json::to_string_pretty(value)
                .map(|s| s + "\n")
                .map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Self::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        };
        rendered.map_err(|e| StepError::Other(format!("failed to write {self:?} document: {e}")))
    }
}

/// Merge `overlay` into `base`.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    result.remove(key);
                } else if let Some(base_value) = base_map.get(key) {
                    result.insert(key.clone(), deep_merge(base_value, overlay_value));
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }
            Value::Object(result)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn patch_file(path: &Path, patch: &Value, format: Format) -> Result<(), StepError> {
    let original = if path.exists() {
        format.load(&std::fs::read_to_string(path)?)?
    } else {
        Value::Object(Default::default())
    };
    let merged = deep_merge(&original, patch);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format.dump(&merged)?)?;
    Ok(())
}

pub struct Patch;

#[async_trait]
impl Step for Patch {
    fn kind(&self) -> &'static str {
        "patch"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::required("file", ValueKind::String),
            Port::required("patch", ValueKind::Map),
            Port::optional("format", ValueKind::String),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let src = inputs.path("folder_path")?;
        let file = inputs.str("file")?;
        if !is_safe_relative(Path::new(&file)) {
            return Err(StepError::input("file", format!("'{file}' escapes the folder")));
        }
        let format = match inputs.opt_str("format")? {
            Some(name) => Format::parse(&name)?,
            None => Format::detect(&file)?,
        };
        let patch = Value::Object(inputs.map("patch")?);

        let dest = ctx.work_dir.join("patched");
        let task_dest = dest.clone();
        tokio::task::spawn_blocking(move || {
            copy_tree(&src, &task_dest, VCS_DIRS)?;
            patch_file(&task_dest.join(&file), &patch, format)
        })
        .await
        .map_err(|e| StepError::Other(format!("patch task failed: {e}")))??;
        Ok(output("folder_path", path_value(&dest)))
    }
}
