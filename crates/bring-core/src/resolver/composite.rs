use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bring_schema::{PkgVersion, SourceDescription, StepSpec, Vars, format_vars};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Resolved, Resolver, fields};
use crate::context::BringContext;
use crate::matcher;
use crate::steps::NestedPipeline;

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    source: Option<SourceDescription>,
    #[serde(default)]
    pkg: Option<String>,
    #[serde(default)]
    vars: Vars,
}

#[derive(Debug, Deserialize)]
struct CompositeSource {
    packages: Vec<Child>,
    #[serde(default)]
    flatten: Option<bool>,
}

/// A package of packages: each child is resolved through the metadata cache,
/// the version matching its `vars` is selected, and the children's step lists
/// become the nested pipelines of a single `merge_pipelines` step.
pub struct CompositeResolver;

#[async_trait]
impl Resolver for CompositeResolver {
    fn kind(&self) -> &'static str {
        "composite"
    }

    async fn resolve(&self, ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: CompositeSource = fields(source)?;
        if cfg.packages.is_empty() {
            bail!("composite source lists no packages");
        }

        let mut pipelines = Vec::with_capacity(cfg.packages.len());
        for (index, child) in cfg.packages.into_iter().enumerate() {
            let child_source = match (child.source, child.pkg) {
                (Some(source), _) => source,
                (None, Some(name)) => bail!("package reference '{name}' was not expanded by an index"),
                (None, None) => bail!("packages[{index}] has neither 'source' nor 'pkg'"),
            };
            let catalog = ctx
                .cache
                .get_or_refresh(ctx, &child_source, ctx.config.metadata_max_age, false)
                .await
                .map_err(|e| anyhow!(e).context(format!("packages[{index}]")))?;
            let version = matcher::find(&child.vars, &catalog).ok_or_else(|| {
                anyhow!(
                    "packages[{index}]: no version of '{}' matches {}",
                    catalog.source_id,
                    format_vars(&child.vars)
                )
            })?;
            debug!(index, source_id = %catalog.source_id, vars = %format_vars(&version.variables), "selected child version");

            let mut vars = version.variables.clone();
            vars.extend(child.vars);
            pipelines.push(NestedPipeline {
                steps: version.steps.clone(),
                vars,
            });
        }

        let mut step = StepSpec::new("merge_pipelines").with("pipelines", serde_json::to_value(&pipelines)?);
        if let Some(flatten) = cfg.flatten {
            step = step.with("flatten", flatten);
        }
        Ok(Resolved::new(vec![PkgVersion::new(Vars::new(), vec![step])]))
    }
}
