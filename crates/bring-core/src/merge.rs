//! Tracked merging of finished file-sets into a target directory.
//!
//! Every file bring writes into a target is recorded in
//! `<target>/.bring/registry.json` together with its content hash, owning
//! package and install variables. The registry decides whether an existing
//! destination may be replaced. All operations are planned before the first
//! write, so a conflict leaves the target untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bring_schema::target::{ITEMS_DIR, METADATA_DIR, REGISTRY_FILE};
use bring_schema::{ContentHash, ItemRecord, TargetEntry, TargetRegistry, Vars};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{BringError, Result};
use crate::io::fs::{atomic_write, copy_file, move_file, rel_string, walk_files};
use crate::paths::VCS_DIRS;
use crate::sync::KeyedLocks;

/// How existing destination files are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Replace bring-managed files; fail on foreign ones.
    #[default]
    Default,
    /// Replace any file and take ownership of it.
    Overwrite,
    /// Like `Overwrite`, and also remove files this package installed
    /// previously that are no longer part of it.
    Replace,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Overwrite => "overwrite",
            Self::Replace => "replace",
        })
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "overwrite" => Ok(Self::Overwrite),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown merge policy '{other}' (default, overwrite, replace)")),
        }
    }
}

/// Whether source files are moved or copied into the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MoveMethod {
    /// Rename when possible; for ephemeral pipeline outputs.
    Move,
    #[default]
    Copy,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub policy: MergePolicy,
    pub move_method: MoveMethod,
    /// Install every file at the target root under its basename.
    pub flatten: bool,
    /// Directory names skipped in addition to the VCS directories.
    pub exclude_dirs: Vec<String>,
}

/// Who is installing: recorded in the registry and the item side file.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMetadata {
    pub package_id: String,
    pub variables: Vars,
}

/// Relative paths touched by a merge, each list sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

impl MergeResult {
    /// Whether the merge changed nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

enum Action {
    Create,
    Update,
    Unchanged,
}

struct Planned {
    relative: String,
    source: PathBuf,
    hash: ContentHash,
    action: Action,
}

/// Directories bring refuses to merge into, whatever the policy.
fn protected_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = ["/", "/bin", "/boot", "/dev", "/etc", "/lib", "/proc", "/sbin", "/sys", "/usr", "/var", "/System", "/Library"]
        .iter()
        .map(PathBuf::from)
        .collect();
    if let Some(home) = dirs::home_dir() {
        for sub in ["", "Desktop", "Documents", "Downloads", "Music", "Pictures", "Videos", ".ssh"] {
            paths.push(if sub.is_empty() { home.clone() } else { home.join(sub) });
        }
    }
    paths
}

fn check_protected(target: &Path) -> Result<()> {
    let resolved = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    if protected_paths().iter().any(|p| p == target || p == &resolved) {
        return Err(BringError::ProtectedPath(target.to_path_buf()));
    }
    Ok(())
}

fn registry_path(target: &Path) -> PathBuf {
    target.join(METADATA_DIR).join(REGISTRY_FILE)
}

/// Load the registry of `target`; a missing registry is empty.
///
/// # Errors
///
/// Returns [`BringError::Config`] if the registry exists but cannot be parsed.
pub fn load_registry(target: &Path) -> Result<TargetRegistry> {
    let path = registry_path(target);
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            BringError::Config(format!("corrupt target registry {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TargetRegistry::default()),
        Err(e) => Err(e.into()),
    }
}

/// Everything a merge will do, decided before the first write.
struct Plan {
    files: Vec<Planned>,
    /// Existing regular files that sit where a planned file needs a directory.
    displaced: BTreeSet<String>,
}

fn collect_files(sources: &[PathBuf], options: &MergeOptions) -> Result<BTreeMap<String, PathBuf>> {
    let mut exclude: Vec<String> = VCS_DIRS.iter().map(|s| (*s).to_string()).collect();
    exclude.extend(options.exclude_dirs.iter().cloned());

    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
    for source in sources {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for file in walk_files(source, &exclude)? {
            let original = rel_string(&file.relative);
            let relative = if options.flatten {
                file.relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                original.clone()
            };
            if let Some(first) = seen.insert(relative.clone(), original.clone()) {
                return Err(BringError::Config(format!(
                    "flattening {} would install both '{first}' and '{original}' as '{relative}'",
                    source.display()
                )));
            }
            files.insert(relative, file.absolute);
        }
    }
    Ok(files)
}

/// Parent directories of `relative`, nearest last, without the target root.
fn parent_dirs(relative: &str) -> Vec<String> {
    let mut parents: Vec<String> = Path::new(relative)
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .map(rel_string)
        .collect();
    parents.reverse();
    parents
}

fn plan(
    target: &Path,
    sources: &[PathBuf],
    options: &MergeOptions,
    item: &ItemMetadata,
    registry: &TargetRegistry,
) -> Result<Plan> {
    let files = collect_files(sources, options)?;

    let mut planned = Vec::with_capacity(files.len());
    let mut displaced = BTreeSet::new();
    let mut conflicts = BTreeSet::new();
    for (relative, source) in &files {
        let mut blocked = false;
        for parent in parent_dirs(relative) {
            if files.contains_key(&parent) {
                conflicts.insert(parent);
                blocked = true;
                continue;
            }
            let Ok(meta) = fs::symlink_metadata(target.join(&parent)) else {
                break;
            };
            if meta.is_dir() {
                continue;
            }
            if registry.is_managed(&parent) || options.policy != MergePolicy::Default {
                displaced.insert(parent);
            } else {
                conflicts.insert(parent);
                blocked = true;
            }
        }
        if blocked {
            continue;
        }

        let hash = ContentHash::of_file(source)?;
        let dest = target.join(relative);
        let entry = registry.entries.get(relative);
        let exists = fs::symlink_metadata(&dest).is_ok();

        let action = if dest.is_dir() {
            conflicts.insert(relative.clone());
            continue;
        } else if !exists {
            Action::Create
        } else if let Some(entry) = entry {
            let on_disk = ContentHash::of_file(&dest).ok();
            if entry.is_same_install(&hash, &item.package_id, &item.variables)
                && on_disk.as_ref() == Some(&hash)
            {
                Action::Unchanged
            } else {
                Action::Update
            }
        } else if options.policy == MergePolicy::Default {
            conflicts.insert(relative.clone());
            continue;
        } else {
            Action::Update
        };
        planned.push(Planned {
            relative: relative.clone(),
            source: source.clone(),
            hash,
            action,
        });
    }

    if !conflicts.is_empty() {
        return Err(BringError::MergeConflict {
            target: target.to_path_buf(),
            paths: conflicts.into_iter().collect(),
        });
    }
    Ok(Plan {
        files: planned,
        displaced,
    })
}

fn install_file(source: &Path, dest: &Path, method: MoveMethod) -> Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{name}.bring-tmp"));
    match method {
        MoveMethod::Move => move_file(source, &staging)?,
        MoveMethod::Copy => copy_file(source, &staging)?,
    }
    if let Err(e) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}

/// Remove now-empty directories between `path` and `root`.
fn prune_empty_parents(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn remove_tracked(target: &Path, relative: &str, registry: &mut TargetRegistry) -> Result<()> {
    let path = target.join(relative);
    match fs::remove_file(&path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    prune_empty_parents(target, &path);
    registry.entries.remove(relative);
    Ok(())
}

/// Carry out `plan`. The registry is persisted even when a write fails, so
/// every file that reached the target stays tracked.
fn write_plan(
    target: &Path,
    plan: &Plan,
    stale: &[String],
    options: &MergeOptions,
    item: &ItemMetadata,
    registry: &mut TargetRegistry,
) -> Result<MergeResult> {
    let mut result = MergeResult::default();
    let applied = apply_plan(target, plan, stale, options, item, registry, &mut result);
    if let Err(e) = applied {
        let persisted = to_json(registry).and_then(|bytes| atomic_write(&registry_path(target), &bytes).map_err(Into::into));
        match persisted {
            Ok(()) => warn!(target = %target.display(), error = %e, "merge failed part way, installed files recorded"),
            Err(persist) => warn!(target = %target.display(), error = %persist, "failed to record partial merge"),
        }
        return Err(e);
    }

    let record = ItemRecord {
        package_id: item.package_id.clone(),
        variables: item.variables.clone(),
        files: plan.files.iter().map(|f| f.relative.clone()).collect(),
    };
    let record_path = target
        .join(METADATA_DIR)
        .join(ITEMS_DIR)
        .join(format!("{}.json", ItemRecord::item_hash(&item.package_id, &item.variables)));
    atomic_write(&record_path, &to_json(&record)?)?;
    atomic_write(&registry_path(target), &to_json(registry)?)?;
    Ok(result)
}

fn apply_plan(
    target: &Path,
    plan: &Plan,
    stale: &[String],
    options: &MergeOptions,
    item: &ItemMetadata,
    registry: &mut TargetRegistry,
    result: &mut MergeResult,
) -> Result<()> {
    fs::create_dir_all(target)?;
    for relative in &plan.displaced {
        remove_tracked(target, relative, registry)?;
        result.removed.push(relative.clone());
    }

    for file in &plan.files {
        match file.action {
            Action::Unchanged => {
                result.unchanged.push(file.relative.clone());
                continue;
            }
            Action::Create | Action::Update => {}
        }
        install_file(&file.source, &target.join(&file.relative), options.move_method)?;
        registry.entries.insert(
            file.relative.clone(),
            TargetEntry {
                relative_path: file.relative.clone(),
                content_hash: file.hash.clone(),
                owning_package_id: item.package_id.clone(),
                variables_used: item.variables.clone(),
                installed_at: Utc::now(),
            },
        );
        match file.action {
            Action::Create => result.created.push(file.relative.clone()),
            _ => result.updated.push(file.relative.clone()),
        }
    }

    for relative in stale {
        remove_tracked(target, relative, registry)?;
        result.removed.push(relative.clone());
    }
    result.removed.sort();
    Ok(())
}

fn merge_blocking(
    target: &Path,
    sources: &[PathBuf],
    options: &MergeOptions,
    item: &ItemMetadata,
) -> Result<MergeResult> {
    check_protected(target)?;
    let mut registry = load_registry(target)?;
    let plan = plan(target, sources, options, item, &registry)?;

    let stale: Vec<String> = if options.policy == MergePolicy::Replace {
        registry
            .owned_by(&item.package_id)
            .map(|e| e.relative_path.clone())
            .filter(|p| !plan.files.iter().any(|f| &f.relative == p) && !plan.displaced.contains(p))
            .collect()
    } else {
        Vec::new()
    };

    write_plan(target, &plan, &stale, options, item, &mut registry)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| BringError::Io(std::io::Error::other(e)))
}

/// Serializes merges per target directory.
#[derive(Debug, Default)]
pub struct TargetMerger {
    locks: KeyedLocks,
}

impl TargetMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `sources` into `target` on behalf of `item`.
    ///
    /// Later sources win over earlier ones for the same relative path.
    ///
    /// # Errors
    ///
    /// - [`BringError::ProtectedPath`] for a deny-listed target.
    /// - [`BringError::MergeConflict`] listing every unmanaged destination
    ///   under [`MergePolicy::Default`]; nothing is written in that case.
    /// - I/O errors while writing.
    pub async fn merge(
        &self,
        target: &Path,
        sources: &[PathBuf],
        options: &MergeOptions,
        item: &ItemMetadata,
    ) -> Result<MergeResult> {
        let target = std::path::absolute(target)?;
        let _guard = self.locks.lock(&target.to_string_lossy()).await;
        debug!(target = %target.display(), package = %item.package_id, policy = %options.policy, "merging");

        let task_target = target.clone();
        let sources = sources.to_vec();
        let options = options.clone();
        let item = item.clone();
        let result = tokio::task::spawn_blocking(move || {
            merge_blocking(&task_target, &sources, &options, &item)
        })
        .await
        .map_err(|e| BringError::Task(e.to_string()))??;

        info!(
            target = %target.display(),
            created = result.created.len(),
            updated = result.updated.len(),
            unchanged = result.unchanged.len(),
            removed = result.removed.len(),
            "merge complete"
        );
        Ok(result)
    }
}
