//! bring - package sources in, managed target directories out
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves package sources (git repositories, forge releases, URL
//! templates, local folders, composites) into cached version catalogs,
//! builds the selected version through a step pipeline and merges the
//! result into a target directory that records which package owns which
//! file.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.bring/
//! ├── indexes/    # Package definitions, one subdirectory per index
//! ├── cache/      # Catalogs, downloads and git mirrors
//! └── workspace/  # Per-run working directories
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use bring_core::MergePolicy;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bring")]
#[command(author, version, about = "bring - install packages into managed target directories")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand. Each overrides the matching
/// `BRING_*` environment variable.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Root for caches, workspaces and default indexes
    #[arg(long, global = true, env = "BRING_HOME")]
    pub home: Option<PathBuf>,

    /// Package index directory (repeatable; defaults to $BRING_HOME/indexes)
    #[arg(long = "index", global = true, value_name = "DIR")]
    pub indexes: Vec<PathBuf>,

    /// Catalog freshness window in seconds (0 = always refresh, -1 = never expire)
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub max_age: Option<i64>,

    /// Maximum number of concurrent tasks
    #[arg(long, global = true)]
    pub parallelism: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl GlobalArgs {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install a package into a target directory
    Install {
        /// Package name, or index.name
        package: String,
        /// Version variable (repeatable): --var version=1.2 --var os=linux
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
        /// Directory to merge into
        #[arg(long, short, default_value = ".")]
        target: PathBuf,
        /// How to treat files that already exist in the target
        #[arg(long, default_value = "default")]
        policy: MergePolicy,
        /// Copy build output into the target instead of moving it
        #[arg(long)]
        copy: bool,
        /// Drop directory structure and place every file at the target root
        #[arg(long)]
        flatten: bool,
        /// Directory names never merged (repeatable)
        #[arg(long = "exclude", value_name = "DIR")]
        exclude_dirs: Vec<String>,
    },
    /// Show a package's versions, aliases and arguments
    Info {
        /// Package name, or index.name
        package: String,
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// List packages across all indexes
    List,
    /// Refresh cached catalogs
    Update {
        /// Packages to refresh (all when empty)
        packages: Vec<String>,
        /// Ignore the freshness window
        #[arg(long, short)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Parse `KEY=VALUE`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
