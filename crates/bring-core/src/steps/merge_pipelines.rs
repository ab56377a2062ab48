use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::warn;

use super::shape::merge_trees;
use super::{Inputs, NestedPipeline, Outputs, Port, Step, StepContext, ValueKind, path_value};
use crate::error::{BringError, StepError};
use crate::io::fs::{copy_file, copy_tree};
use crate::paths::VCS_DIRS;
use crate::pipeline::{Pipeline, RunOutput};

/// Run several sub-pipelines concurrently and merge their results.
///
/// Every sub-pipeline runs to completion even if a sibling fails; the first
/// failure (in declaration order) is then reported.
pub struct MergePipelines;

fn parse(config: &Map<String, Value>) -> Result<Vec<NestedPipeline>, StepError> {
    let raw = config
        .get("pipelines")
        .cloned()
        .ok_or_else(|| StepError::input("pipelines", "missing"))?;
    serde_json::from_value(raw).map_err(|e| StepError::input("pipelines", e))
}

#[async_trait]
impl Step for MergePipelines {
    fn kind(&self) -> &'static str {
        "merge_pipelines"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("pipelines", ValueKind::List),
            Port::optional("parallelism", ValueKind::Integer),
            Port::optional("flatten", ValueKind::Bool),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::required("folder_paths", ValueKind::List),
        ];
        PORTS
    }

    fn nested(&self, config: &Map<String, Value>) -> Result<Vec<NestedPipeline>, StepError> {
        if config.contains_key("pipelines") {
            parse(config)
        } else {
            Ok(Vec::new())
        }
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let pipelines: Vec<NestedPipeline> =
            serde_json::from_value(Value::Array(inputs.list("pipelines")?))
                .map_err(|e| StepError::input("pipelines", e))?;
        let width = inputs
            .opt_u64("parallelism")?
            .map_or(ctx.bring.config.parallelism, |n| n as usize)
            .max(1);
        let flatten = inputs.bool_or("flatten", false)?;

        let mut results: Vec<(usize, Result<RunOutput, BringError>)> =
            futures::stream::iter(pipelines.into_iter().enumerate())
                .map(|(index, nested)| async move {
                    let label = format!("{}/{index}", ctx.run);
                    let result = match Pipeline::plan(&ctx.bring.steps, label, &nested.steps, nested.vars) {
                        Ok(pipeline) => pipeline.run(ctx.bring).await,
                        Err(e) => Err(e),
                    };
                    (index, result)
                })
                .buffer_unordered(width)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (index, result) in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) if first_error.is_none() => first_error = Some((index, e)),
                Err(e) => warn!(index, error = %e, "sibling sub-pipeline also failed"),
            }
        }
        if let Some((index, source)) = first_error {
            return Err(StepError::Nested {
                index,
                source: Box::new(source),
            });
        }

        let parts_dir = ctx.work_dir.join("parts");
        let merged = ctx.work_dir.join("merged");
        let task_parts = parts_dir.clone();
        let task_merged = merged.clone();
        let parts = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, StepError> {
            let mut parts = Vec::with_capacity(outputs.len());
            for (index, output) in outputs.iter().enumerate() {
                let part = task_parts.join(index.to_string());
                match (output.folder_path(), output.file_path()) {
                    (Some(folder), _) => {
                        copy_tree(folder, &part, VCS_DIRS)?;
                    }
                    (None, Some(file)) => {
                        copy_file(file, &part.join(file.file_name().unwrap_or_default()))?;
                    }
                    (None, None) => {
                        return Err(StepError::Other(format!(
                            "sub-pipeline {index} produced no folder_path or file_path"
                        )));
                    }
                }
                parts.push(part);
            }
            merge_trees(&task_merged, &parts, flatten)?;
            Ok(parts)
        })
        .await
        .map_err(|e| StepError::Other(format!("merge task failed: {e}")))??;

        let mut out = Outputs::new();
        out.insert("folder_path".to_string(), path_value(&merged));
        out.insert(
            "folder_paths".to_string(),
            Value::Array(parts.iter().map(|p| path_value(p)).collect()),
        );
        Ok(out)
    }
}
