use async_trait::async_trait;
use serde_json::Value;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::process::run_tool;

/// Render a helm chart into a single manifest file with `helm template`.
pub struct Helm;

#[async_trait]
impl Step for Helm {
    fn kind(&self) -> &'static str {
        "helm"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::optional("release_name", ValueKind::String),
            Port::optional("namespace", ValueKind::String),
            Port::optional("values", ValueKind::Map),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let chart = inputs.path("folder_path")?;
        let release = inputs
            .opt_str("release_name")?
            .unwrap_or_else(|| "release".to_string());
        let values = inputs.map("values")?;

        let mut args = vec![
            "template".to_string(),
            release.clone(),
            chart.to_string_lossy().into_owned(),
        ];
        if let Some(namespace) = inputs.opt_str("namespace")? {
            args.push("--namespace".to_string());
            args.push(namespace);
        }
        if !values.is_empty() {
            let values_file = ctx.work_dir.join("values.yaml");
            let yaml = serde_yaml::to_string(&Value::Object(values))
                .map_err(|e| StepError::Other(format!("failed to write helm values: {e}")))?;
            tokio::fs::write(&values_file, yaml).await?;
            args.push("--values".to_string());
            args.push(values_file.to_string_lossy().into_owned());
        }

        let manifest = run_tool("helm", &args, None).await?;
        let dest = ctx.work_dir.join("manifests");
        tokio::fs::create_dir_all(&dest).await?;
        tokio::fs::write(dest.join(format!("{release}.yaml")), manifest).await?;
        Ok(output("folder_path", path_value(&dest)))
    }
}
