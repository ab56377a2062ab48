//! Metadata cache: resolver output persisted per source id with an age-based
//! freshness policy.
//!
//! A refresh runs the resolver, applies the source-level post-processing
//! (artefact override, transform, mogrify, fixed vars, aliases), injects the
//! `latest`/`stable` aliases, substitutes `{{ var }}` placeholders in every
//! step config, derives the argument schema and writes the catalog
//! atomically. Refreshes of one source id are serialized; concurrent callers
//! waiting on the same id reuse the catalog built while they waited.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, anyhow};
use bring_schema::{Catalog, PkgVersion, SourceDescription, StepSpec, find_reserved_key};
use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::args;
use crate::context::BringContext;
use crate::error::{BringError, Result};
use crate::io::fs::atomic_write;
use crate::resolver::{Resolved, Resolver};
use crate::sync::KeyedLocks;
use crate::template::render_value;

/// Aliases injected for the first non-prerelease version.
pub const DEFAULT_ALIASES: &[&str] = &["latest", "stable"];

static PRERELEASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(alpha|beta|rc|pre|preview|dev|nightly|snapshot)").expect("valid prerelease regex")
});

/// Whether a version string looks like a prerelease.
pub fn looks_prerelease(version: &str) -> bool {
    let bare = version.strip_prefix('v').unwrap_or(version);
    match semver::Version::parse(bare) {
        Ok(v) => !v.pre.is_empty(),
        Err(_) => PRERELEASE.is_match(bare),
    }
}

fn is_prerelease(version: &PkgVersion) -> bool {
    if version.metadata.get("prerelease").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    version
        .version_string()
        .is_some_and(|v| looks_prerelease(&v))
}

fn merge_config(into: &mut Map<String, Value>, from: &Map<String, Value>) {
    for (k, v) in from {
        into.insert(k.clone(), v.clone());
    }
}

/// Apply the source's `artefact`, `transform`, `mogrify` and `vars` to one version.
fn post_process(source: &SourceDescription, mut version: PkgVersion) -> anyhow::Result<PkgVersion> {
    if let Some(artefact) = &source.artefact {
        match version.steps.iter().rposition(|s| s.kind == artefact.kind) {
            Some(i) => merge_config(&mut version.steps[i].config, &artefact.config),
            None => match version.steps.last_mut() {
                Some(last) => *last = artefact.clone(),
                None => version.steps.push(artefact.clone()),
            },
        }
    }
    if let Some(transform) = &source.transform {
        version.steps.push(transform.to_step());
    }
    version.steps.extend(source.mogrify.iter().cloned());
    for (k, v) in &source.vars {
        version.variables.insert(k.clone(), v.clone());
    }
    if let Some(key) = find_reserved_key(&version.variables) {
        return Err(anyhow!("variable '{key}' uses a reserved name"));
    }
    Ok(version)
}

fn substitute(version: &mut PkgVersion) -> anyhow::Result<()> {
    let vars = version.variables.clone();
    for (index, step) in version.steps.iter_mut().enumerate() {
        let rendered = render_value(&Value::Object(step.config.clone()), &vars)
            .with_context(|| format!("step {index} ({})", step.kind))?;
        if let Value::Object(config) = rendered {
            step.config = config;
        }
    }
    Ok(())
}

/// Turn raw resolver output into a catalog.
pub fn build_catalog(
    source: &SourceDescription,
    source_id: &str,
    resolver: &str,
    resolved: Resolved,
) -> anyhow::Result<Catalog> {
    let Resolved {
        versions,
        mut aliases,
        args: mut overrides,
    } = resolved;

    let mut versions = versions
        .into_iter()
        .map(|v| post_process(source, v))
        .collect::<anyhow::Result<Vec<_>>>()?;

    for (key, table) in &source.aliases {
        aliases
            .entry(key.clone())
            .or_default()
            .extend(table.iter().map(|(a, v)| (a.clone(), v.clone())));
    }
    if let Some(stable) = versions.iter().find(|v| !is_prerelease(v)) {
        if let Some(value) = stable.variables.get("version").cloned() {
            let table = aliases.entry("version".to_string()).or_default();
            for alias in DEFAULT_ALIASES {
                table.entry((*alias).to_string()).or_insert_with(|| value.clone());
            }
        }
    }

    for version in &mut versions {
        substitute(version)?;
    }

    for (name, over) in &source.args {
        overrides.insert(name.clone(), over.clone());
    }
    let args = args::derive(&versions, &aliases, &source.vars, &overrides);

    Ok(Catalog {
        source_id: source_id.to_string(),
        resolver: resolver.to_string(),
        versions,
        aliases,
        args,
        built_at: Utc::now(),
    })
}

fn load(path: &Path) -> Option<Catalog> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable metadata cache entry");
            None
        }
    }
}

/// Catalog store, one JSON file per resolver kind and source id.
#[derive(Debug, Default)]
pub struct MetadataCache {
    locks: KeyedLocks,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolver_for(ctx: &BringContext, source: &SourceDescription) -> Result<std::sync::Arc<dyn Resolver>> {
        ctx.resolvers.get(&source.kind).ok_or_else(|| {
            BringError::Config(format!(
                "unknown source kind '{}' (known: {})",
                source.kind,
                ctx.resolvers.kinds().join(", ")
            ))
        })
    }

    /// Cache file of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] for an unknown source kind.
    pub fn path_for(&self, ctx: &BringContext, source: &SourceDescription) -> Result<PathBuf> {
        let resolver = Self::resolver_for(ctx, source)?;
        let id = resolver.unique_id(source);
        Ok(ctx.config.metadata_dir(resolver.kind()).join(format!("{id}.json")))
    }

    /// Remove the cached catalog of `source`, forcing the next call to rebuild it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file exists and cannot be removed.
    pub fn invalidate(&self, ctx: &BringContext, source: &SourceDescription) -> Result<()> {
        let path = self.path_for(ctx, source)?;
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Return the catalog of `source`, rebuilding it when it is older than
    /// `max_age` seconds (0 = always, negative = never) or when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Resolution`] if the resolver or the
    /// post-processing fails; the previous cache entry is left intact.
    pub async fn get_or_refresh(
        &self,
        ctx: &BringContext,
        source: &SourceDescription,
        max_age: i64,
        force: bool,
    ) -> Result<Catalog> {
        let resolver = Self::resolver_for(ctx, source)?;
        let id = resolver.unique_id(source);
        let path = ctx.config.metadata_dir(resolver.kind()).join(format!("{id}.json"));

        if !force {
            if let Some(catalog) = load(&path).filter(|c| c.is_fresh(max_age, Utc::now())) {
                debug!(source_id = %id, "metadata cache hit");
                ctx.reporter.catalog(&id, catalog.versions.len(), false);
                return Ok(catalog);
            }
        }

        let waiting_since = Utc::now();
        let _guard = self.locks.lock(&id).await;
        if let Some(catalog) = load(&path) {
            let rebuilt_meanwhile = catalog.built_at >= waiting_since;
            if rebuilt_meanwhile || (!force && catalog.is_fresh(max_age, Utc::now())) {
                debug!(source_id = %id, "catalog refreshed by a concurrent caller");
                ctx.reporter.catalog(&id, catalog.versions.len(), false);
                return Ok(catalog);
            }
        }

        info!(source_id = %id, kind = resolver.kind(), "resolving");
        let resolved = resolver
            .resolve(ctx, source)
            .await
            .map_err(|e| BringError::resolution(&id, e))?;
        let catalog = build_catalog(source, &id, resolver.kind(), resolved)
            .map_err(|e| BringError::resolution(&id, e))?;

        let bytes = serde_json::to_vec_pretty(&catalog)
            .map_err(|e| BringError::resolution(&id, e))?;
        atomic_write(&path, &bytes)?;
        ctx.reporter.catalog(&id, catalog.versions.len(), true);
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bring_schema::{TransformSpec, Vars};
    use serde_json::json;

    fn version(v: &str) -> PkgVersion {
        let mut vars = Vars::new();
        vars.insert("version".into(), json!(v));
        PkgVersion::new(
            vars,
            vec![
                StepSpec::new("download").with("url", "https://dl/{{ version }}/tool-{{ os }}.tar.gz"),
                StepSpec::new("extract"),
            ],
        )
    }

    fn source() -> SourceDescription {
        let mut source = SourceDescription::new("test");
        source.vars.insert("os".into(), json!("linux"));
        source
    }

    #[test]
    fn test_prerelease_detection() {
        assert!(looks_prerelease("v2.0.0-rc.1"));
        assert!(looks_prerelease("nightly"));
        assert!(!looks_prerelease("1.4.2"));
        assert!(!looks_prerelease("main"));
    }

    #[test]
    fn test_latest_points_at_first_stable() {
        let resolved = Resolved::new(vec![version("2.0.0-beta.1"), version("1.9.0"), version("1.8.0")]);
        let catalog = build_catalog(&source(), "id", "test", resolved).unwrap();
        assert_eq!(catalog.aliases["version"]["latest"], json!("1.9.0"));
        assert_eq!(catalog.aliases["version"]["stable"], json!("1.9.0"));
    }

    #[test]
    fn test_explicit_alias_is_kept() {
        let mut src = source();
        let mut table = std::collections::BTreeMap::new();
        table.insert("latest".to_string(), json!("1.8.0"));
        src.aliases.insert("version".into(), table);

        let resolved = Resolved::new(vec![version("1.9.0"), version("1.8.0")]);
        let catalog = build_catalog(&src, "id", "test", resolved).unwrap();
        assert_eq!(catalog.aliases["version"]["latest"], json!("1.8.0"));
        assert_eq!(catalog.aliases["version"]["stable"], json!("1.9.0"));
    }

    #[test]
    fn test_placeholders_substituted_with_fixed_vars() {
        let catalog = build_catalog(&source(), "id", "test", Resolved::new(vec![version("1.0")])).unwrap();
        assert_eq!(
            catalog.versions[0].steps[0].get("url").unwrap(),
            "https://dl/1.0/tool-linux.tar.gz"
        );
        assert!(!catalog.args.contains_key("os"));
        assert!(catalog.args.contains_key("version"));
    }

    #[test]
    fn test_unresolved_placeholder_is_an_error() {
        let mut v = version("1.0");
        v.steps[1] = StepSpec::new("extract").with("target_name", "{{ missing }}");
        assert!(build_catalog(&source(), "id", "test", Resolved::new(vec![v])).is_err());
    }

    #[test]
    fn test_artefact_transform_and_mogrify() {
        let mut src = source();
        src.artefact = Some(StepSpec::new("extract").with("remove_root", false));
        src.transform = Some(TransformSpec {
            flatten: true,
            ..TransformSpec::default()
        });
        src.mogrify = vec![StepSpec::new("validate").with("min_files", 1)];

        let catalog = build_catalog(&src, "id", "test", Resolved::new(vec![version("1.0")])).unwrap();
        let kinds: Vec<&str> = catalog.versions[0].steps.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec!["download", "extract", "transform", "validate"]);
        assert_eq!(catalog.versions[0].steps[1].get("remove_root").unwrap(), false);

        src.artefact = Some(StepSpec::new("folder").with("path", "/opt/tool"));
        let catalog = build_catalog(&src, "id", "test", Resolved::new(vec![version("1.0")])).unwrap();
        assert_eq!(catalog.versions[0].steps[1].kind, "folder");
    }

    #[test]
    fn test_reserved_variables_are_rejected() {
        let mut v = version("1.0");
        v.variables.insert("__internal".into(), json!(1));
        assert!(build_catalog(&source(), "id", "test", Resolved::new(vec![v])).is_err());
    }
}
