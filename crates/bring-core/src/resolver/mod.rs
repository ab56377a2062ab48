//! Source resolvers: turn a [`SourceDescription`] into a list of versions.
//!
//! One implementation per source kind, registered at startup in a
//! [`ResolverRegistry`]. Resolvers only enumerate versions and describe how
//! to acquire them; caching, alias injection and placeholder substitution
//! are done by the metadata cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bring_schema::{Aliases, ArgOverride, PkgVersion, SourceDescription, derive_id};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::BringContext;

pub mod composite;
pub mod folder;
pub mod git;
pub mod release;
pub mod template_url;

/// What a resolver returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// Versions in resolver order, most relevant first.
    pub versions: Vec<PkgVersion>,
    /// Alias tables contributed by the resolver.
    pub aliases: Aliases,
    /// Argument overrides seeding the derived argument schema.
    pub args: BTreeMap<String, ArgOverride>,
}

impl Resolved {
    pub fn new(versions: Vec<PkgVersion>) -> Self {
        Self {
            versions,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Kind tag matched against [`SourceDescription::kind`].
    fn kind(&self) -> &'static str;

    /// Stable id for `source`, used as the cache key.
    fn unique_id(&self, source: &SourceDescription) -> String {
        let value = serde_json::to_value(source).unwrap_or(Value::Null);
        derive_id(self.kind(), &value)
    }

    /// Enumerate the versions of `source`.
    async fn resolve(&self, ctx: &BringContext, source: &SourceDescription) -> Result<Resolved>;
}

/// Deserialize the kind-specific fields of `source` into a typed config.
pub fn fields<T: DeserializeOwned>(source: &SourceDescription) -> Result<T> {
    serde_json::from_value(Value::Object(source.fields.clone()))
        .with_context(|| format!("invalid '{}' source", source.kind))
}

/// Compile-time map from kind tag to resolver implementation.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<&'static str, Arc<dyn Resolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ResolverRegistry {
    /// Registry holding every built-in resolver.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(folder::FolderResolver));
        registry.register(Arc::new(git::GitResolver));
        registry.register(Arc::new(release::GithubReleaseResolver));
        registry.register(Arc::new(release::GitlabReleaseResolver));
        registry.register(Arc::new(release::GithubFilesResolver));
        registry.register(Arc::new(template_url::TemplateUrlResolver));
        registry.register(Arc::new(composite::CompositeResolver));
        registry
    }

    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(resolver.kind(), resolver);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.resolvers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
