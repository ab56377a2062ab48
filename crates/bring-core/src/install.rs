//! Top-level operations: install, explain and metadata updates.

use std::path::PathBuf;
use std::sync::Arc;

use bring_schema::{Catalog, PkgName, Vars, format_vars};
use tracing::info;

use crate::args;
use crate::context::BringContext;
use crate::error::{BringError, Result};
use crate::matcher;
use crate::merge::{ItemMetadata, MergeOptions, MergeResult};
use crate::orchestrator::TaskGroup;
use crate::package::{IndexSet, Package, PackageIndex};
use crate::pipeline::Pipeline;

/// What to install where.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// `name` or `index.name`.
    pub package: String,
    pub vars: Vars,
    pub target: PathBuf,
    pub options: MergeOptions,
}

/// A completed install.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    /// Owner id recorded in the target registry (`index.name`).
    pub package_id: String,
    /// Variables of the installed version.
    pub variables: Vars,
    pub target: PathBuf,
    pub result: MergeResult,
}

/// Entry point tying the package indexes to a context.
#[derive(Debug, Clone)]
pub struct Bring {
    ctx: Arc<BringContext>,
    indexes: IndexSet,
}

impl Bring {
    pub fn new(ctx: Arc<BringContext>, indexes: IndexSet) -> Self {
        Self { ctx, indexes }
    }

    pub fn context(&self) -> &Arc<BringContext> {
        &self.ctx
    }

    pub fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    async fn catalog_of(&self, pkg: &Package, force: bool) -> Result<Catalog> {
        let max_age = pkg.max_age(self.ctx.config.metadata_max_age);
        self.ctx
            .cache
            .get_or_refresh(&self.ctx, &pkg.source, max_age, force)
            .await
    }

    /// The catalog of `package`: versions, aliases and argument schema.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] for unknown packages and
    /// [`BringError::Resolution`] if the catalog cannot be built.
    pub async fn explain(&self, package: &str) -> Result<Catalog> {
        let (_, pkg) = self.indexes.find(package)?;
        self.catalog_of(pkg, false).await
    }

    /// Resolve, select, build and merge one package.
    ///
    /// # Errors
    ///
    /// - [`BringError::NoMatchingVersion`] listing the valid combinations.
    /// - [`BringError::PipelineWiring`] before anything runs.
    /// - [`BringError::StepExecution`] from the failing step.
    /// - [`BringError::MergeConflict`] with the target left untouched.
    pub async fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        let (index, pkg) = self.indexes.find(&request.package)?;
        info!(package = %request.package, target = %request.target.display(), "installing");
        self.install_package(index, pkg, request).await
    }

    async fn install_package(
        &self,
        index: &PackageIndex,
        pkg: &Package,
        request: &InstallRequest,
    ) -> Result<InstallOutcome> {
        let catalog = self.catalog_of(pkg, false).await?;
        let requested = args::apply_defaults(&pkg.name, &request.vars, &catalog.args)?;
        let version = matcher::find(&requested, &catalog).ok_or_else(|| {
            BringError::NoMatchingVersion {
                package: pkg.name.to_string(),
                requested: format_vars(&requested),
                combinations: catalog.combinations(),
            }
        })?;
        info!(package = %pkg.name, version = %format_vars(&version.variables), "selected version");

        let mut run_vars = matcher::translate(&requested, &catalog.aliases);
        run_vars.extend(version.variables.clone());
        let pipeline = Pipeline::plan(&self.ctx.steps, pkg.name.as_str(), &version.steps, run_vars)?;
        pipeline.require_output("folder_path")?;
        let output = pipeline.run(&self.ctx).await?;
        let folder = output
            .folder_path()
            .map(PathBuf::from)
            .ok_or_else(|| BringError::Config(format!("'{}' produced no folder", pkg.name)))?;

        let item = ItemMetadata {
            package_id: package_id(index, &pkg.name),
            variables: version.variables.clone(),
        };
        let result = self
            .ctx
            .merger
            .merge(&request.target, &[folder], &request.options, &item)
            .await?;
        drop(output);
        self.ctx.reporter.merged(&pkg.name, &request.target, &result);

        Ok(InstallOutcome {
            package_id: item.package_id,
            variables: item.variables,
            target: request.target.clone(),
            result,
        })
    }

    /// Install several packages concurrently.
    ///
    /// Every request runs to completion; results are returned in request order.
    pub async fn install_many(&self, requests: Vec<InstallRequest>) -> Vec<Result<InstallOutcome>> {
        let mut group = TaskGroup::new(self.ctx.config.parallelism);
        for request in requests {
            let this = self.clone();
            group.spawn(async move { this.install(&request).await });
        }
        group.join_all().await
    }

    /// Refresh catalogs of `packages`, or of every indexed package when empty.
    pub async fn update_metadata(&self, packages: &[String], force: bool) -> Vec<(PkgName, Result<usize>)> {
        if packages.is_empty() {
            let mut results = Vec::new();
            for index in self.indexes.indexes() {
                results.extend(index.update_all_metadata(&self.ctx, force).await);
            }
            return results;
        }

        let mut group = TaskGroup::new(self.ctx.config.parallelism);
        let mut names = Vec::with_capacity(packages.len());
        for address in packages {
            names.push(PkgName::new(address.as_str()));
            let this = self.clone();
            let address = address.clone();
            group.spawn(async move {
                let (_, pkg) = this.indexes.find(&address)?;
                let catalog = this.catalog_of(pkg, force).await?;
                Ok::<_, BringError>(catalog.versions.len())
            });
        }
        names.into_iter().zip(group.join_all().await).collect()
    }
}

fn package_id(index: &PackageIndex, name: &PkgName) -> String {
    format!("{}.{name}", index.name)
}
