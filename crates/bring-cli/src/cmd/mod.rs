//! Subcommand implementations.

pub mod completions;
pub mod info;
pub mod install;
pub mod list;
pub mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use bring_core::{Bring, BringConfig, BringContext, IndexSet};
use tokio_util::sync::CancellationToken;

use crate::GlobalArgs;
use crate::ui::ConsoleReporter;

/// Environment configuration with command-line overrides applied.
pub fn config(global: &GlobalArgs) -> Result<BringConfig> {
    let mut config = BringConfig::from_env()?;
    if let Some(home) = &global.home {
        config.home.clone_from(home);
    }
    if let Some(max_age) = global.max_age {
        config.metadata_max_age = max_age;
    }
    if let Some(parallelism) = global.parallelism {
        config.parallelism = parallelism.max(1);
    }
    Ok(config)
}

/// Index roots to load: the explicit `--index` directories, else the
/// default index directory under the bring home.
pub fn index_roots(global: &GlobalArgs, config: &BringConfig) -> Result<Vec<PathBuf>> {
    if global.indexes.is_empty() {
        return Ok(vec![config.index_dir()]);
    }
    for dir in &global.indexes {
        if !dir.is_dir() {
            bail!("index directory {} does not exist", dir.display());
        }
    }
    Ok(global.indexes.clone())
}

/// Build the context and load every index. Ctrl-C cancels in-flight work.
pub fn open(global: &GlobalArgs) -> Result<Bring> {
    let config = config(global)?;
    let indexes = IndexSet::load_dirs(&index_roots(global, &config)?)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let ctx: Arc<BringContext> = BringContext::builder(config)
        .reporter(Arc::new(ConsoleReporter::new(global.quiet)))
        .cancel(cancel)
        .build()?;
    Ok(Bring::new(ctx, indexes))
}
