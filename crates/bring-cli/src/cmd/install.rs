//! Install command

use std::path::Path;

use anyhow::Result;
use bring_core::{Bring, InstallRequest, MergeOptions, MergePolicy, MoveMethod};
use bring_schema::{Vars, format_vars};
use serde_json::Value;

/// Everything `bring install` needs besides the package and target.
#[derive(Debug, Clone)]
pub struct InstallArgs<'a> {
    pub vars: &'a [(String, String)],
    pub policy: MergePolicy,
    pub copy: bool,
    pub flatten: bool,
    pub exclude_dirs: &'a [String],
}

impl InstallArgs<'_> {
    fn options(&self) -> MergeOptions {
        MergeOptions {
            policy: self.policy,
            move_method: if self.copy { MoveMethod::Copy } else { MoveMethod::Move },
            flatten: self.flatten,
            exclude_dirs: self.exclude_dirs.to_vec(),
        }
    }

    fn vars(&self) -> Vars {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

/// Install `package` into `target`.
pub async fn install(bring: &Bring, package: &str, target: &Path, args: &InstallArgs<'_>) -> Result<()> {
    let request = InstallRequest {
        package: package.to_string(),
        vars: args.vars(),
        target: target.to_path_buf(),
        options: args.options(),
    };
    let outcome = bring.install(&request).await?;
    let result = &outcome.result;
    println!(
        "installed {} ({}) into {}: {} created, {} updated, {} unchanged, {} removed",
        outcome.package_id,
        format_vars(&outcome.variables),
        outcome.target.display(),
        result.created.len(),
        result.updated.len(),
        result.unchanged.len(),
        result.removed.len()
    );
    Ok(())
}
