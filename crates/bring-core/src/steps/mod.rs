//! Pipeline steps ("mogrifiers") and their compile-time registry.
//!
//! Every step publishes static `requires`/`provides` port lists so a pipeline
//! can be validated before anything runs. A step receives its inputs (the run
//! context overlaid by its own config) and a private working directory, and
//! returns named outputs that are merged back into the run context.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bring_schema::{StepSpec, Vars, scalar_to_string};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::BringContext;
use crate::error::StepError;

pub mod download;
pub mod extract;
pub mod folder;
pub mod git_export;
pub mod helm;
pub mod merge_pipelines;
pub mod patch;
pub mod shape;
pub mod template;
pub mod transform;
pub mod validate;

/// Type tag of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Path,
    Bool,
    Integer,
    List,
    Map,
    Any,
}

impl ValueKind {
    /// Whether `value` is acceptable for this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String | Self::Path => value.is_string() || value.is_number(),
            Self::Bool => value.is_boolean() || matches!(value.as_str(), Some("true" | "false")),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Path => "path",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        })
    }
}

/// A named, typed input or output of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    pub kind: ValueKind,
    pub optional: bool,
}

impl Port {
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.name, self.kind, if self.optional { "?" } else { "" })
    }
}

/// A sub-pipeline embedded in a step's config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedPipeline {
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub vars: Vars,
}

/// Per-invocation environment handed to a step.
pub struct StepContext<'a> {
    pub bring: &'a BringContext,
    /// Fresh, step-private working directory.
    pub work_dir: &'a Path,
    /// Full run context (variables and earlier outputs).
    pub vars: &'a Vars,
    /// Label of the run, for progress events.
    pub run: &'a str,
}

/// The values a step reads: run context overlaid by the step's own config.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: Map<String, Value>,
}

impl Inputs {
    pub fn new(context: &Vars, config: &Map<String, Value>) -> Self {
        let mut values: Map<String, Value> =
            context.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, v) in config {
            values.insert(k.clone(), v.clone());
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<String, StepError> {
        self.opt_str(name)?
            .ok_or_else(|| StepError::input(name, "missing"))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<String>, StepError> {
        match self.get(name) {
            None => Ok(None),
            Some(v @ (Value::String(_) | Value::Number(_))) => Ok(Some(scalar_to_string(v))),
            Some(other) => Err(StepError::input(name, format!("expected a string, got {other}"))),
        }
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, StepError> {
        self.str(name).map(PathBuf::from)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, StepError> {
        self.opt_bool(name).map(|b| b.unwrap_or(default))
    }

    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>, StepError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
            Some(other) => Err(StepError::input(name, format!("expected a bool, got {other}"))),
        }
    }

    pub fn opt_u64(&self, name: &str) -> Result<Option<u64>, StepError> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| StepError::input(name, format!("expected an integer, got {v}"))),
        }
    }

    pub fn list(&self, name: &str) -> Result<Vec<Value>, StepError> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(StepError::input(name, format!("expected a list, got {other}"))),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<Vec<String>, StepError> {
        self.list(name)?
            .iter()
            .map(|v| match v {
                Value::String(_) | Value::Number(_) => Ok(scalar_to_string(v)),
                other => Err(StepError::input(name, format!("expected strings, got {other}"))),
            })
            .collect()
    }

    pub fn map(&self, name: &str) -> Result<Map<String, Value>, StepError> {
        match self.get(name) {
            None => Ok(Map::new()),
            Some(Value::Object(m)) => Ok(m.clone()),
            Some(other) => Err(StepError::input(name, format!("expected a map, got {other}"))),
        }
    }
}

/// Step outputs, merged into the run context.
pub type Outputs = Vars;

/// Build a single-entry output map.
pub fn output(name: &str, value: impl Into<Value>) -> Outputs {
    let mut out = Outputs::new();
    out.insert(name.to_string(), value.into());
    out
}

/// Render a path as an output value.
pub fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// One transformation in a pipeline.
#[async_trait]
pub trait Step: Send + Sync {
    /// Kind tag used in [`StepSpec::kind`].
    fn kind(&self) -> &'static str;

    /// Named inputs this step reads.
    fn requires(&self) -> &'static [Port];

    /// Named outputs this step writes.
    fn provides(&self) -> &'static [Port];

    /// Sub-pipelines embedded in `config`, validated together with the parent.
    fn nested(&self, _config: &Map<String, Value>) -> Result<Vec<NestedPipeline>, StepError> {
        Ok(Vec::new())
    }

    /// Execute the step.
    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError>;
}

/// Compile-time map from kind tag to step implementation.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<&'static str, Arc<dyn Step>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.steps.keys().collect();
        kinds.sort();
        f.debug_struct("StepRegistry").field("kinds", &kinds).finish()
    }
}

impl StepRegistry {
    /// Registry holding every built-in step.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(download::Download));
        registry.register(Arc::new(download::DownloadMultiple));
        registry.register(Arc::new(extract::Extract));
        registry.register(Arc::new(git_export::GitExport));
        registry.register(Arc::new(folder::Folder));
        registry.register(Arc::new(shape::MergeFolders));
        registry.register(Arc::new(shape::PickSubfolder));
        registry.register(Arc::new(shape::Flatten));
        registry.register(Arc::new(transform::Transform));
        registry.register(Arc::new(template::Template));
        registry.register(Arc::new(patch::Patch));
        registry.register(Arc::new(helm::Helm));
        registry.register(Arc::new(validate::Validate));
        registry.register(Arc::new(merge_pipelines::MergePipelines));
        registry
    }

    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.steps.insert(step.kind(), step);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.steps.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_has_every_kind() {
        let registry = StepRegistry::builtin();
        assert_eq!(
            registry.kinds(),
            vec![
                "download",
                "download_multiple",
                "extract",
                "flatten",
                "folder",
                "git_export",
                "helm",
                "merge_folders",
                "merge_pipelines",
                "patch",
                "pick_subfolder",
                "template",
                "transform",
                "validate",
            ]
        );
        for kind in registry.kinds() {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_inputs_config_overrides_context() {
        let mut ctx = Vars::new();
        ctx.insert("url".into(), json!("from-context"));
        ctx.insert("version".into(), json!(2));
        let mut config = Map::new();
        config.insert("url".into(), json!("from-config"));

        let inputs = Inputs::new(&ctx, &config);
        assert_eq!(inputs.str("url").unwrap(), "from-config");
        assert_eq!(inputs.str("version").unwrap(), "2");
        assert!(inputs.opt_str("missing").unwrap().is_none());
        assert!(inputs.bool_or("url", false).is_err());
    }

    #[test]
    fn test_port_display() {
        assert_eq!(Port::optional("remove_root", ValueKind::Bool).to_string(), "remove_root:bool?");
        assert_eq!(Port::required("url", ValueKind::String).to_string(), "url:string");
    }
}
