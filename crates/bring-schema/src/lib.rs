//! Shared data model for bring: source descriptions, version catalogs and
//! target tracking metadata.

pub mod catalog;
pub mod hash;
pub mod platform;
pub mod source;
pub mod target;
pub mod types;

// Re-exports
pub use catalog::{Aliases, ArgSchema, ArgSpec, Catalog, PkgVersion};
pub use hash::*;
pub use platform::{Arch, AssetPlatform, Os};
pub use source::{ArgOverride, SourceDescription, StepSpec, TransformSpec};
pub use target::{ItemRecord, TargetEntry, TargetRegistry};
pub use types::*;
