//! The transmogrificator: validates a step list and runs it against a named-value context.
//!
//! Planning checks the whole chain before anything touches the disk: every
//! step kind must be registered, every required input must come from the
//! step's own config, the initial variables, or an earlier step's outputs,
//! and literal config values must have the declared type. Running executes
//! steps strictly in order, each in a fresh working directory under the
//! shared workspace. When the run ends, only the directory holding the final
//! result survives, and only for as long as the [`RunOutput`] is alive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bring_schema::{StepSpec, Vars};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::context::BringContext;
use crate::error::{BringError, Result};
use crate::reporter::RunState;
use crate::steps::{Inputs, Step, StepContext, StepRegistry, ValueKind};

/// Output names that carry a pipeline's result.
pub const RESULT_OUTPUTS: &[&str] = &["folder_path", "file_path"];

/// One validated step.
struct PlannedStep {
    spec: StepSpec,
    step: Arc<dyn Step>,
}

/// A validated, not yet executed, pipeline.
pub struct Pipeline {
    label: String,
    steps: Vec<PlannedStep>,
    vars: Vars,
    available: HashMap<String, ValueKind>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("label", &self.label)
            .field("steps", &self.steps.iter().map(|s| &s.spec.kind).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn compatible(wanted: ValueKind, have: ValueKind) -> bool {
    use ValueKind::{Any, Path, String};
    wanted == have
        || wanted == Any
        || have == Any
        || matches!((wanted, have), (String, Path) | (Path, String))
}

fn wiring(step: usize, kind: &str, message: impl Into<String>) -> BringError {
    BringError::PipelineWiring {
        step,
        kind: kind.to_string(),
        message: message.into(),
    }
}

/// Validate `steps` given the names already available; returns the names
/// (and kinds) available after the last step.
fn validate(
    registry: &StepRegistry,
    steps: &[StepSpec],
    mut available: HashMap<String, ValueKind>,
) -> Result<(Vec<PlannedStep>, HashMap<String, ValueKind>)> {
    let mut planned = Vec::with_capacity(steps.len());
    for (index, spec) in steps.iter().enumerate() {
        let step = registry.get(&spec.kind).ok_or_else(|| {
            wiring(
                index,
                &spec.kind,
                format!("unknown step kind (known: {})", registry.kinds().join(", ")),
            )
        })?;

        for port in step.requires() {
            match spec.config.get(port.name).filter(|v| !v.is_null()) {
                Some(value) if !port.kind.accepts(value) => {
                    return Err(wiring(
                        index,
                        &spec.kind,
                        format!("'{}' must be a {}, got {value}", port.name, port.kind),
                    ));
                }
                Some(_) => {}
                None => match available.get(port.name) {
                    Some(have) if !compatible(port.kind, *have) => {
                        return Err(wiring(
                            index,
                            &spec.kind,
                            format!("'{}' must be a {}, but a {have} is available", port.name, port.kind),
                        ));
                    }
                    Some(_) => {}
                    None if port.optional => {}
                    None => {
                        return Err(wiring(
                            index,
                            &spec.kind,
                            format!(
                                "requires '{}', which is neither configured, a variable, nor produced by an earlier step",
                                port.name
                            ),
                        ));
                    }
                },
            }
        }

        let nested = step
            .nested(&spec.config)
            .map_err(|e| wiring(index, &spec.kind, e.to_string()))?;
        for (sub, pipeline) in nested.iter().enumerate() {
            let names = pipeline
                .vars
                .keys()
                .map(|k| (k.clone(), ValueKind::Any))
                .collect();
            let (_, after) = validate(registry, &pipeline.steps, names).map_err(|e| {
                wiring(index, &spec.kind, format!("sub-pipeline {sub}: {e}"))
            })?;
            if !RESULT_OUTPUTS.iter().any(|name| after.contains_key(*name)) {
                return Err(wiring(
                    index,
                    &spec.kind,
                    format!("sub-pipeline {sub} produces neither folder_path nor file_path"),
                ));
            }
        }

        for port in step.provides() {
            available.insert(port.name.to_string(), port.kind);
        }
        debug!(index, kind = %spec.kind, "step wired");
        planned.push(PlannedStep {
            spec: spec.clone(),
            step,
        });
    }
    Ok((planned, available))
}

impl Pipeline {
    /// Validate `steps` against `vars` without creating anything on disk.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::PipelineWiring`] for unknown kinds, unsatisfied
    /// requirements and mistyped config values.
    pub fn plan(
        registry: &StepRegistry,
        label: impl Into<String>,
        steps: &[StepSpec],
        vars: Vars,
    ) -> Result<Self> {
        let names = vars.keys().map(|k| (k.clone(), ValueKind::Any)).collect();
        let (steps, available) = validate(registry, steps, names)?;
        Ok(Self {
            label: label.into(),
            steps,
            vars,
            available,
        })
    }

    /// Number of planned steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether `name` is available once every step has run.
    pub fn provides(&self, name: &str) -> bool {
        self.available.contains_key(name)
    }

    /// Fail unless the pipeline ends with `name` available.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::PipelineWiring`] naming the final position.
    pub fn require_output(&self, name: &str) -> Result<()> {
        if self.provides(name) {
            return Ok(());
        }
        let kind = self
            .steps
            .last()
            .map_or_else(|| "<empty>".to_string(), |s| s.spec.kind.clone());
        Err(wiring(
            self.steps.len().saturating_sub(1),
            &kind,
            format!("the pipeline never produces '{name}'"),
        ))
    }

    /// Execute every step in order.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::StepExecution`] for the first failing step, or
    /// [`BringError::Cancelled`] if cancellation was requested between steps.
    /// Intermediate working directories are removed in every case.
    pub async fn run(self, ctx: &BringContext) -> Result<RunOutput> {
        let Self {
            label, steps, vars, ..
        } = self;
        let reporter = &ctx.reporter;
        reporter.run_state(&label, &RunState::Pending { steps: steps.len() });

        let workspace = ctx.config.workspace_dir();
        tokio::fs::create_dir_all(&workspace).await?;

        let mut vars = vars;
        let mut dirs: Vec<TempDir> = Vec::with_capacity(steps.len());
        for (index, planned) in steps.iter().enumerate() {
            let kind = planned.spec.kind.as_str();
            if let Err(e) = ctx.check_cancelled() {
                reporter.run_state(&label, &RunState::Failed {
                    index,
                    kind: kind.to_string(),
                });
                return Err(e);
            }
            reporter.run_state(&label, &RunState::Running {
                index,
                kind: kind.to_string(),
            });

            let dir = tempfile::Builder::new()
                .prefix(&format!("{index:02}-{kind}-"))
                .tempdir_in(&workspace)?;
            let inputs = Inputs::new(&vars, &planned.spec.config);
            let step_ctx = StepContext {
                bring: ctx,
                work_dir: dir.path(),
                vars: &vars,
                run: &label,
            };
            let outcome = planned.step.run(&step_ctx, &inputs).await;
            dirs.push(dir);
            match outcome {
                Ok(outputs) => vars.extend(outputs),
                Err(source) => {
                    reporter.run_state(&label, &RunState::Failed {
                        index,
                        kind: kind.to_string(),
                    });
                    return Err(BringError::StepExecution {
                        step: index,
                        kind: kind.to_string(),
                        source,
                    });
                }
            }
        }

        reporter.run_state(&label, &RunState::Completed);
        let output = RunOutput::new(vars, dirs);
        info!(run = %label, result = ?output.path(), "pipeline finished");
        Ok(output)
    }
}

/// Result of a finished run. Owns the working directory holding the final
/// result; dropping it removes that directory.
#[derive(Debug)]
pub struct RunOutput {
    /// Final run context.
    pub vars: Vars,
    folder_path: Option<PathBuf>,
    file_path: Option<PathBuf>,
    _keep: Option<TempDir>,
}

impl RunOutput {
    fn new(vars: Vars, dirs: Vec<TempDir>) -> Self {
        let path_of = |name: &str| {
            vars.get(name)
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
        };
        let folder_path = path_of("folder_path");
        let file_path = path_of("file_path");
        let result = folder_path.clone().or_else(|| file_path.clone());
        let keep = result.and_then(|path| dirs.into_iter().find(|d| path.starts_with(d.path())));
        Self {
            vars,
            folder_path,
            file_path,
            _keep: keep,
        }
    }

    /// The final folder, if the pipeline produced one.
    pub fn folder_path(&self) -> Option<&Path> {
        self.folder_path.as_deref()
    }

    /// The final file, if the pipeline produced one.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// The folder if there is one, else the file.
    pub fn path(&self) -> Option<&Path> {
        self.folder_path().or_else(|| self.file_path())
    }
}
