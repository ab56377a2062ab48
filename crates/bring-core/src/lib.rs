//! bring: resolve package sources into version catalogs, build a selected
//! version through a typed step pipeline and merge the result into a
//! tracked target directory.

pub mod args;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod install;
pub mod io;
pub mod matcher;
pub mod merge;
pub mod orchestrator;
pub mod package;
pub mod paths;
pub mod pipeline;
pub mod reporter;
pub mod resolver;
pub mod steps;
pub mod sync;
pub mod template;

pub use config::BringConfig;
pub use context::BringContext;
pub use error::{BringError, Result, StepError};
pub use install::{Bring, InstallOutcome, InstallRequest};
pub use merge::{ItemMetadata, MergeOptions, MergePolicy, MergeResult, MoveMethod};
pub use package::{IndexSet, Package, PackageIndex};
pub use paths::*;
pub use reporter::{ChannelReporter, Event, NullReporter, Reporter, RunState};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("bring/", env!("CARGO_PKG_VERSION"));
