//! External tool invocation (git, helm) with captured stderr.

use std::ffi::OsStr;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::StepError;

/// Run `tool` with `args`, returning its stdout.
///
/// The tool is located on `PATH` first so that a missing binary is reported
/// as such rather than as an opaque spawn error.
pub async fn run_tool<I, S>(tool: &str, args: I, cwd: Option<&Path>) -> Result<Vec<u8>, StepError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = which::which(tool).map_err(|_| StepError::ToolMissing(tool.to_string()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(tool, ?cmd, "spawning");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(StepError::Subprocess {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}
