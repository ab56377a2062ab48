//! Package names, variable maps and scalar helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Variable names starting with this prefix are reserved for internal markers.
pub const RESERVED_PREFIX: &str = "__";

/// A set of named scalar values (os, arch, version, ...).
///
/// Ordered so that serialized catalogs and derived hashes are deterministic.
pub type Vars = BTreeMap<String, Value>;

/// Package name newtype.
///
/// Provides compile-time distinction from other strings such as index names
/// or variable values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PkgName(String);

impl PkgName {
    /// Create a new package name.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PkgName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PkgName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PkgName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PkgName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for PkgName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PkgName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<&str> for PkgName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Render a scalar for display and for template substitution.
///
/// Strings are rendered without quotes; everything else uses its JSON form.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Returns `true` if a requested value selects the given version value.
///
/// List-valued requests match if any member matches. Strings and numbers
/// compare by their rendered form so that `"1"` and `1` are interchangeable.
pub fn scalar_matches(requested: &Value, actual: &Value) -> bool {
    match requested {
        Value::Array(items) => items.iter().any(|item| scalar_matches(item, actual)),
        _ if requested == actual => true,
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            !actual.is_array() && !actual.is_object() && scalar_to_string(requested) == scalar_to_string(actual)
        }
        _ => false,
    }
}

/// Returns the first reserved key in `vars`, if any.
pub fn find_reserved_key(vars: &Vars) -> Option<&str> {
    vars.keys()
        .map(String::as_str)
        .find(|k| k.starts_with(RESERVED_PREFIX))
}

/// Format a variable map as `k=v, k=v` for messages.
pub fn format_vars(vars: &Vars) -> String {
    if vars.is_empty() {
        return "(no variables)".to_string();
    }
    vars.iter()
        .map(|(k, v)| format!("{k}={}", scalar_to_string(v)))
        .collect::<Vec<_>>()
        .join(", ")
}
