//! TOML package definitions and the indexes that group them.
//!
//! A package file names a source description plus some human-readable info.
//! An index is a directory of such files; an [`IndexSet`] stacks several
//! indexes and resolves `name` or `index.name` addresses.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bring_schema::{PkgName, SourceDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::context::BringContext;
use crate::error::{BringError, Result};
use crate::orchestrator::TaskGroup;

/// Errors that can occur when loading or parsing a package definition.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<PackageError> for BringError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::Io(e) => Self::Io(e),
            PackageError::Parse(e) => Self::Config(e.to_string()),
        }
    }
}

/// Human-readable package description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

/// One package definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Defaults to the file stem when loaded from an index.
    #[serde(default)]
    pub name: PkgName,
    #[serde(default)]
    pub info: PackageInfo,
    pub source: SourceDescription,
    /// Per-package metadata freshness window, overriding the global one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_max_age: Option<i64>,
}

impl Package {
    /// Parse a package from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the TOML is malformed or lacks a `[source]`.
    pub fn parse(content: &str) -> Result<Self, PackageError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a package from a file, naming it after the file stem if unnamed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, PackageError> {
        let content = fs::read_to_string(path)?;
        let mut pkg = Self::parse(&content)?;
        if pkg.name.is_empty() {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            pkg.name = PkgName::new(stem);
        }
        Ok(pkg)
    }

    /// Metadata freshness window for this package.
    pub fn max_age(&self, default: i64) -> i64 {
        self.metadata_max_age.unwrap_or(default)
    }
}

impl std::str::FromStr for Package {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Make relative `folder` paths absolute against `base`, descending into
/// inline composite children.
fn absolutize(source: &mut SourceDescription, base: &Path) -> Result<()> {
    match source.kind.as_str() {
        "folder" => {
            if let Some(Value::String(path)) = source.fields.get_mut("path") {
                if Path::new(path.as_str()).is_relative() {
                    *path = base.join(path.as_str()).to_string_lossy().into_owned();
                }
            }
        }
        "composite" => {
            if let Some(Value::Array(children)) = source.fields.get_mut("packages") {
                for child in children.iter_mut().filter_map(Value::as_object_mut) {
                    if let Some(raw) = child.get("source") {
                        let mut nested: SourceDescription = serde_json::from_value(raw.clone())
                            .map_err(|e| BringError::Config(format!("invalid composite child: {e}")))?;
                        absolutize(&mut nested, base)?;
                        child.insert("source".to_string(), to_value(&nested)?);
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn to_value(source: &SourceDescription) -> Result<Value> {
    serde_json::to_value(source).map_err(|e| BringError::Config(e.to_string()))
}

/// Replace `{ pkg = "name" }` composite children by the referenced package's
/// source, recursively. `stack` holds the packages being expanded.
fn expand_refs(
    source: &mut SourceDescription,
    raw: &BTreeMap<PkgName, Package>,
    stack: &mut Vec<String>,
) -> Result<()> {
    if source.kind != "composite" {
        return Ok(());
    }
    let Some(Value::Array(children)) = source.fields.get_mut("packages") else {
        return Ok(());
    };
    for child in children.iter_mut().filter_map(Value::as_object_mut) {
        let nested = if let Some(reference) = child.remove("pkg") {
            let name = reference
                .as_str()
                .ok_or_else(|| BringError::Config("'pkg' must be a package name".to_string()))?
                .to_string();
            if stack.contains(&name) {
                return Err(BringError::Config(format!(
                    "package reference cycle: {} -> {name}",
                    stack.join(" -> ")
                )));
            }
            let target = raw.get(name.as_str()).ok_or_else(|| {
                BringError::Config(format!(
                    "'{}' references unknown package '{name}'",
                    stack.last().map_or("?", String::as_str)
                ))
            })?;
            let mut nested = target.source.clone();
            stack.push(name);
            expand_refs(&mut nested, raw, stack)?;
            stack.pop();
            nested
        } else if let Some(inline) = child.get("source") {
            let mut nested: SourceDescription = serde_json::from_value(inline.clone())
                .map_err(|e| BringError::Config(format!("invalid composite child: {e}")))?;
            expand_refs(&mut nested, raw, stack)?;
            nested
        } else {
            continue;
        };
        child.insert("source".to_string(), to_value(&nested)?);
    }
    Ok(())
}

/// A named collection of packages loaded from one directory.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    pub name: String,
    pub root: PathBuf,
    packages: BTreeMap<PkgName, Package>,
}

impl PackageIndex {
    /// Load every `*.toml` file below `dir`.
    ///
    /// Relative `folder` paths are resolved against the defining file's
    /// directory and composite `pkg` references are expanded inline.
    ///
    /// # Errors
    ///
    /// - [`BringError::DuplicateDefinition`] if two files define the same name.
    /// - [`BringError::Config`] for malformed files, unknown references or
    ///   reference cycles.
    pub fn load_dir(name: impl Into<String>, dir: &Path) -> Result<Self> {
        let name = name.into();
        let mut packages: BTreeMap<PkgName, Package> = BTreeMap::new();
        let mut origins: BTreeMap<PkgName, PathBuf> = BTreeMap::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| BringError::Io(std::io::Error::other(e)))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|e| e != "toml") {
                continue;
            }
            let mut pkg = Package::from_file(path).map_err(|e| match e {
                PackageError::Parse(e) => BringError::Config(format!("{}: {e}", path.display())),
                other => other.into(),
            })?;
            let base = path.parent().unwrap_or(dir);
            absolutize(&mut pkg.source, base)?;

            if let Some(first) = origins.get(&pkg.name) {
                return Err(BringError::DuplicateDefinition {
                    what: "package",
                    name: pkg.name.to_string(),
                    first: first.display().to_string(),
                    second: path.display().to_string(),
                });
            }
            origins.insert(pkg.name.clone(), path.to_path_buf());
            packages.insert(pkg.name.clone(), pkg);
        }

        let mut expanded = BTreeMap::new();
        for (pkg_name, pkg) in &packages {
            let mut pkg = pkg.clone();
            let mut stack = vec![pkg_name.to_string()];
            expand_refs(&mut pkg.source, &packages, &mut stack)?;
            expanded.insert(pkg_name.clone(), pkg);
        }

        info!(index = %name, packages = expanded.len(), "loaded package index");
        Ok(Self {
            name,
            root: dir.to_path_buf(),
            packages: expanded,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Refresh the catalog of every package in a bounded task group.
    ///
    /// One package failing does not stop the others; each outcome is
    /// returned with the package name (version count on success).
    pub async fn update_all_metadata(
        &self,
        ctx: &Arc<BringContext>,
        force: bool,
    ) -> Vec<(PkgName, Result<usize>)> {
        let mut group = TaskGroup::new(ctx.config.parallelism);
        let names: Vec<PkgName> = self.packages.keys().cloned().collect();
        for pkg in self.packages.values() {
            let ctx = ctx.clone();
            let source = pkg.source.clone();
            let max_age = pkg.max_age(ctx.config.metadata_max_age);
            group.spawn(async move {
                let catalog = ctx.cache.get_or_refresh(&ctx, &source, max_age, force).await?;
                Ok::<_, BringError>(catalog.versions.len())
            });
        }
        let results: Vec<(PkgName, Result<usize>)> =
            names.into_iter().zip(group.join_all().await).collect();
        for (name, result) in &results {
            if let Err(e) = result {
                warn!(index = %self.name, package = %name, error = %e, "metadata update failed");
            }
        }
        results
    }
}

/// Several indexes searched in registration order.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    indexes: Vec<PackageIndex>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every subdirectory of each of `roots` as an index named after
    /// the subdirectory, or `roots` themselves when they hold package files.
    ///
    /// # Errors
    ///
    /// Propagates index loading errors and duplicate index names.
    pub fn load_dirs(roots: &[PathBuf]) -> Result<Self> {
        let mut set = Self::new();
        for root in roots {
            if !root.is_dir() {
                continue;
            }
            let mut subdirs = Vec::new();
            let mut has_files = false;
            for entry in fs::read_dir(root)? {
                let path = entry?.path();
                if path.is_dir() {
                    subdirs.push(path);
                } else if path.extension().is_some_and(|e| e == "toml") {
                    has_files = true;
                }
            }
            subdirs.sort();
            if has_files {
                set.add(PackageIndex::load_dir(dir_name(root), root)?)?;
            } else {
                for dir in subdirs {
                    set.add(PackageIndex::load_dir(dir_name(&dir), &dir)?)?;
                }
            }
        }
        Ok(set)
    }

    /// Register `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::DuplicateDefinition`] if an index of the same name exists.
    pub fn add(&mut self, index: PackageIndex) -> Result<()> {
        if let Some(existing) = self.indexes.iter().find(|i| i.name == index.name) {
            return Err(BringError::DuplicateDefinition {
                what: "index",
                name: index.name.clone(),
                first: existing.root.display().to_string(),
                second: index.root.display().to_string(),
            });
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn indexes(&self) -> &[PackageIndex] {
        &self.indexes
    }

    /// Find a package by `name` (first index wins) or `index.name`.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] if no index defines the package.
    pub fn find(&self, address: &str) -> Result<(&PackageIndex, &Package)> {
        for index in &self.indexes {
            if let Some(pkg) = index.get(address) {
                return Ok((index, pkg));
            }
        }
        if let Some((index_name, pkg_name)) = address.split_once('.') {
            if let Some(index) = self.indexes.iter().find(|i| i.name == index_name) {
                if let Some(pkg) = index.get(pkg_name) {
                    return Ok((index, pkg));
                }
            }
        }
        Err(BringError::Config(format!("unknown package '{address}'")))
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}
