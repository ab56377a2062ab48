//! Error taxonomy for resolution, matching, pipeline execution and merging.

use std::path::PathBuf;

use thiserror::Error;

use crate::io::download::DownloadError;
use crate::io::extract::ExtractError;
use crate::template::TemplateError;

/// Top-level error surfaced by every public operation.
#[derive(Error, Debug)]
pub enum BringError {
    /// A resolver could not enumerate versions for a source.
    #[error("failed to resolve '{source_id}': {cause:#}")]
    Resolution {
        source_id: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The requested variables matched no catalog entry.
    #[error("no version of '{package}' matches {requested}")]
    NoMatchingVersion {
        package: String,
        requested: String,
        combinations: Vec<String>,
    },

    /// A step's declared requirements cannot be satisfied.
    #[error("pipeline wiring error at step {step} ({kind}): {message}")]
    PipelineWiring {
        step: usize,
        kind: String,
        message: String,
    },

    /// A step failed while running.
    #[error("step {step} ({kind}) failed: {source}")]
    StepExecution {
        step: usize,
        kind: String,
        #[source]
        source: StepError,
    },

    /// Destination files exist and are not bring-managed.
    #[error("refusing to overwrite unmanaged file(s) in {}: {}", target.display(), paths.join(", "))]
    MergeConflict { target: PathBuf, paths: Vec<String> },

    /// Two packages or indexes register the same name.
    #[error("duplicate {what} '{name}' (defined in {first} and {second})")]
    DuplicateDefinition {
        what: &'static str,
        name: String,
        first: String,
        second: String,
    },

    /// A target that bring must never overwrite.
    #[error("refusing to overwrite protected path {}", .0.display())]
    ProtectedPath(PathBuf),

    /// Invalid configuration or package definition.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled between steps.
    #[error("operation cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BringError {
    /// Wrap a resolver failure for `source_id`.
    pub fn resolution(source_id: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Resolution {
            source_id: source_id.into(),
            cause: cause.into(),
        }
    }

    /// Short explanation of why the error happened.
    pub fn reason(&self) -> String {
        match self {
            Self::Resolution { .. } => {
                "the package source could not be listed (network, VCS or API failure)".to_string()
            }
            Self::NoMatchingVersion { combinations, .. } => {
                format!("the catalog has {} version(s), none compatible", combinations.len())
            }
            Self::PipelineWiring { .. } => {
                "the package description is inconsistent: a step needs a value nothing provides"
                    .to_string()
            }
            Self::StepExecution { source, .. } => match source {
                StepError::Subprocess { stderr, .. } if !stderr.trim().is_empty() => {
                    stderr.trim().to_string()
                }
                other => other.to_string(),
            },
            Self::MergeConflict { paths, .. } => {
                format!("{} file(s) already exist and were not installed by bring", paths.len())
            }
            Self::DuplicateDefinition { .. } => "names must be unique".to_string(),
            Self::ProtectedPath(_) => "this directory is on the protected list".to_string(),
            Self::Config(msg) => msg.clone(),
            Self::Cancelled => "cancellation was requested".to_string(),
            Self::Task(msg) => msg.clone(),
            Self::Io(e) => e.kind().to_string(),
        }
    }

    /// Suggested remedy, where one is actionable.
    pub fn remedy(&self) -> Option<String> {
        match self {
            Self::Resolution { .. } => {
                Some("check connectivity and credentials, then retry with --max-age -1 to use the cached catalog".to_string())
            }
            Self::NoMatchingVersion { combinations, .. } => {
                let shown: Vec<&str> = combinations.iter().take(20).map(String::as_str).collect();
                Some(format!(
                    "choose one of these variable combinations:\n  {}",
                    shown.join("\n  ")
                ))
            }
            Self::PipelineWiring { .. } => {
                Some("fix the package's source/mogrify definition".to_string())
            }
            Self::MergeConflict { .. } => Some(
                "remove the files, or re-run with --policy overwrite to take ownership of them"
                    .to_string(),
            ),
            Self::DuplicateDefinition { .. } => {
                Some("rename or remove one of the definitions".to_string())
            }
            Self::ProtectedPath(_) => Some("install into a dedicated subdirectory".to_string()),
            Self::StepExecution { source, .. } => source.remedy(),
            _ => None,
        }
    }
}

/// A step failed at runtime.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An input had the wrong shape.
    #[error("invalid input '{name}': {message}")]
    Input { name: String, message: String },

    /// A required tool is not on `PATH`.
    #[error("required tool '{0}' not found on PATH")]
    ToolMissing(String),

    /// A subprocess exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Subprocess {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The produced file-set did not satisfy a validation rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A nested pipeline failed.
    #[error("sub-pipeline {index} failed: {source}")]
    Nested {
        index: usize,
        #[source]
        source: Box<BringError>,
    },

    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Create an input error.
    pub fn input(name: &str, message: impl std::fmt::Display) -> Self {
        Self::Input {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn remedy(&self) -> Option<String> {
        match self {
            Self::ToolMissing(tool) => Some(format!("install '{tool}' and make sure it is on PATH")),
            Self::Subprocess { stderr, .. }
                if stderr.contains("Authentication failed")
                    || stderr.contains("Permission denied")
                    || stderr.contains("Could not read from remote repository") =>
            {
                Some("make sure you have access to the repository (ssh-agent key, git credentials or token)".to_string())
            }
            Self::Extract(ExtractError::AmbiguousRoot { .. }) => {
                Some("set remove_root explicitly on the extract step".to_string())
            }
            Self::Nested { source, .. } => source.remedy(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Result alias used across the crate.
pub type Result<T, E = BringError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_remedy_lists_combinations() {
        let err = BringError::NoMatchingVersion {
            package: "fd".into(),
            requested: "os=plan9".into(),
            combinations: vec!["os=linux".into(), "os=darwin".into()],
        };
        let remedy = err.remedy().unwrap();
        assert!(remedy.contains("os=linux"));
        assert!(remedy.contains("os=darwin"));
        assert!(err.reason().contains("2 version"));
    }

    #[test]
    fn test_subprocess_stderr_is_the_reason() {
        let err = BringError::StepExecution {
            step: 0,
            kind: "git_export".into(),
            source: StepError::Subprocess {
                tool: "git".into(),
                status: "exit status: 128".into(),
                stderr: "fatal: Authentication failed\n".into(),
            },
        };
        assert_eq!(err.reason(), "fatal: Authentication failed");
        assert!(err.remedy().unwrap().contains("access"));
    }
}
