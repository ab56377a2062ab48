//! Tracking metadata stored inside a target directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hash::{ContentHash, canonical_hash};
use crate::types::Vars;

/// Name of the hidden metadata subtree under a target root.
pub const METADATA_DIR: &str = ".bring";

/// Registry file name inside [`METADATA_DIR`].
pub const REGISTRY_FILE: &str = "registry.json";

/// Side-file directory inside [`METADATA_DIR`].
pub const ITEMS_DIR: &str = "items";

/// Current registry format version.
pub const REGISTRY_VERSION: u32 = 1;

/// One bring-managed file inside a target directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Path relative to the target root, `/`-separated.
    pub relative_path: String,
    /// SHA256 of the installed content.
    pub content_hash: ContentHash,
    /// Id of the package that owns the file.
    pub owning_package_id: String,
    /// Variables the owning package was installed with.
    #[serde(default)]
    pub variables_used: Vars,
    /// When the content was last written.
    pub installed_at: DateTime<Utc>,
}

impl TargetEntry {
    /// Whether writing `hash` for `package_id` with `vars` would leave this entry unchanged.
    pub fn is_same_install(&self, hash: &ContentHash, package_id: &str, vars: &Vars) -> bool {
        &self.content_hash == hash
            && self.owning_package_id == package_id
            && &self.variables_used == vars
    }
}

/// The registry document: relative path -> entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRegistry {
    /// Format version.
    pub version: u32,
    /// Managed files keyed by relative path.
    #[serde(default)]
    pub entries: BTreeMap<String, TargetEntry>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl TargetRegistry {
    /// Whether `relative_path` is bring-managed.
    pub fn is_managed(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    /// Entries owned by `package_id`.
    pub fn owned_by<'a>(&'a self, package_id: &'a str) -> impl Iterator<Item = &'a TargetEntry> + 'a {
        self.entries
            .values()
            .filter(move |e| e.owning_package_id == package_id)
    }
}

/// Side file describing one installed item (package + variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Owning package id.
    pub package_id: String,
    /// Variables used for the install.
    #[serde(default)]
    pub variables: Vars,
    /// Relative paths written by this item.
    #[serde(default)]
    pub files: Vec<String>,
}

impl ItemRecord {
    /// Stable hash identifying `(package_id, variables)`, used as the side-file name.
    pub fn item_hash(package_id: &str, variables: &Vars) -> String {
        let value = serde_json::json!({
            "package": package_id,
            "variables": variables,
        });
        canonical_hash(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_hash_depends_on_vars() {
        let mut a = Vars::new();
        a.insert("os".into(), json!("linux"));
        let mut b = a.clone();
        b.insert("arch".into(), json!("x64"));
        assert_eq!(ItemRecord::item_hash("p", &a), ItemRecord::item_hash("p", &a));
        assert_ne!(ItemRecord::item_hash("p", &a), ItemRecord::item_hash("p", &b));
        assert_ne!(ItemRecord::item_hash("p", &a), ItemRecord::item_hash("q", &a));
    }

    #[test]
    fn test_same_install() {
        let hash = ContentHash::of_bytes(b"x");
        let entry = TargetEntry {
            relative_path: "bin/x".into(),
            content_hash: hash.clone(),
            owning_package_id: "pkg".into(),
            variables_used: Vars::new(),
            installed_at: Utc::now(),
        };
        assert!(entry.is_same_install(&hash, "pkg", &Vars::new()));
        assert!(!entry.is_same_install(&hash, "other", &Vars::new()));
        assert!(!entry.is_same_install(&ContentHash::of_bytes(b"y"), "pkg", &Vars::new()));
    }
}
