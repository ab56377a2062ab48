//! Resolved version catalogs and the argument schema derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::source::StepSpec;
use crate::types::{Vars, format_vars};

/// Value aliases per variable: variable -> alias -> canonical value.
pub type Aliases = BTreeMap<String, BTreeMap<String, Value>>;

/// Argument schema: argument name -> specification.
pub type ArgSchema = BTreeMap<String, ArgSpec>;

/// One concrete, addressable version of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkgVersion {
    /// Variables identifying this version (os, arch, version, ...).
    #[serde(default)]
    pub variables: Vars,
    /// Ordered step list that acquires and shapes this version's files.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Free-form resolver metadata (release date, asset name, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PkgVersion {
    /// Create a version with the given variables and steps.
    pub fn new(variables: Vars, steps: Vec<StepSpec>) -> Self {
        Self {
            variables,
            steps,
            metadata: Map::new(),
        }
    }

    /// Builder-style metadata setter.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The `version` variable rendered as a string, if present.
    pub fn version_string(&self) -> Option<String> {
        self.variables.get("version").map(crate::scalar_to_string)
    }
}

/// Specification of one user-facing argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Values observed across the catalog, in first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    /// Accepted aliases for values of this argument.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, Value>,
    /// Whether the caller must supply the argument.
    #[serde(default)]
    pub required: bool,
}

/// The cached set of all versions, aliases and argument schema for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Unique id of the source this catalog was built from.
    pub source_id: String,
    /// Resolver kind that produced it.
    pub resolver: String,
    /// Versions in resolver order (typically most recent first).
    pub versions: Vec<PkgVersion>,
    /// Alias tables per variable.
    #[serde(default)]
    pub aliases: Aliases,
    /// Derived argument schema.
    #[serde(default)]
    pub args: ArgSchema,
    /// When the catalog was built.
    pub built_at: DateTime<Utc>,
}

impl Catalog {
    /// Age of the catalog in whole seconds at `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.built_at).num_seconds()
    }

    /// Whether the catalog is still valid under `max_age` seconds.
    ///
    /// Negative ages never expire; zero always expires.
    pub fn is_fresh(&self, max_age: i64, now: DateTime<Utc>) -> bool {
        if max_age < 0 {
            return true;
        }
        if max_age == 0 {
            return false;
        }
        self.age_secs(now) < max_age
    }

    /// Human-readable list of valid variable combinations, one per line.
    pub fn combinations(&self) -> Vec<String> {
        self.versions
            .iter()
            .map(|v| format_vars(&v.variables))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn catalog_built(ago: i64) -> (Catalog, DateTime<Utc>) {
        let now = Utc::now();
        let catalog = Catalog {
            source_id: "git-abc".into(),
            resolver: "git".into(),
            versions: vec![],
            aliases: Aliases::new(),
            args: ArgSchema::new(),
            built_at: now - Duration::seconds(ago),
        };
        (catalog, now)
    }

    #[test]
    fn test_freshness_policy() {
        let (catalog, now) = catalog_built(100);
        assert!(catalog.is_fresh(-1, now));
        assert!(!catalog.is_fresh(0, now));
        assert!(catalog.is_fresh(101, now));
        assert!(!catalog.is_fresh(100, now));
        assert!(!catalog.is_fresh(50, now));
    }

    #[test]
    fn test_version_string() {
        let mut vars = Vars::new();
        vars.insert("version".into(), Value::from("1.2.3"));
        let v = PkgVersion::new(vars, vec![]);
        assert_eq!(v.version_string().as_deref(), Some("1.2.3"));
        assert!(PkgVersion::new(Vars::new(), vec![]).version_string().is_none());
    }
}
