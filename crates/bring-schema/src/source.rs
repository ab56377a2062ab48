//! Authored package source descriptions and uninstantiated step descriptions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::hash::canonical_hash;
use crate::types::Vars;

/// An uninstantiated description of one pipeline step.
///
/// Wire form is `{ kind = "...", <step-specific keys> }`; everything except
/// `kind` lands in `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step kind, looked up in the step registry.
    pub kind: String,
    /// Step-specific configuration. May contain `{{ var }}` placeholders
    /// until the catalog is built.
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl StepSpec {
    /// Create a step spec with an empty config.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: Map::new(),
        }
    }

    /// Builder-style config setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Look up a config value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

/// Manual override or addition for one user-facing argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgOverride {
    /// Help text.
    #[serde(default)]
    pub doc: Option<String>,
    /// Default value used when the caller does not supply one.
    #[serde(default)]
    pub default: Option<Value>,
    /// Extra aliases for this argument's values (alias -> canonical value).
    #[serde(default)]
    pub aliases: BTreeMap<String, Value>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: Option<bool>,
}

/// Post-acquisition content selection and renaming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Glob patterns of files to keep (relative to the folder root).
    #[serde(default)]
    pub include: Vec<String>,
    /// Renames applied after selection (`from` -> `to`).
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    /// Unix modes per glob pattern, as octal strings (`"755"`).
    #[serde(default)]
    pub mode: BTreeMap<String, String>,
    /// Move every selected file to the folder root.
    #[serde(default)]
    pub flatten: bool,
}

impl TransformSpec {
    /// Convert into the `transform` step that implements it.
    pub fn to_step(&self) -> StepSpec {
        let mut step = StepSpec::new("transform");
        if !self.include.is_empty() {
            step = step.with("include", self.include.clone());
        }
        if !self.rename.is_empty() {
            let map: Map<String, Value> = self
                .rename
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            step = step.with("rename", Value::Object(map));
        }
        if !self.mode.is_empty() {
            let map: Map<String, Value> = self
                .mode
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            step = step.with("mode", Value::Object(map));
        }
        if self.flatten {
            step = step.with("flatten", true);
        }
        step
    }
}

/// The authored, kind-tagged description of where a package's files come from.
///
/// Kind-specific fields are kept untyped in `fields`; each resolver
/// deserializes them into its own configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescription {
    /// Resolver kind (`git`, `github_release`, `template_url`, ...).
    pub kind: String,
    /// Manual argument overrides/additions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, ArgOverride>,
    /// Hard-coded values merged into every version, excluded from the argument schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
    /// Extra steps appended to every version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mogrify: Vec<StepSpec>,
    /// Optional content selection applied after acquisition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,
    /// Optional override of the acquisition step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artefact: Option<StepSpec>,
    /// Extra value aliases per variable (variable -> alias -> canonical value).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, BTreeMap<String, Value>>,
    /// Kind-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SourceDescription {
    /// Create a bare description of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: BTreeMap::new(),
            vars: Vars::new(),
            mogrify: Vec::new(),
            transform: None,
            artefact: None,
            aliases: BTreeMap::new(),
            fields: Map::new(),
        }
    }

    /// Builder-style kind-specific field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Structural hash of the whole description.
    ///
    /// Stable for identical descriptions regardless of authoring key order.
    pub fn structural_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        canonical_hash(&value)
    }
}
