use std::path::Path;

use async_trait::async_trait;
use glob::Pattern;

use super::{Inputs, Outputs, Port, Step, StepContext, ValueKind, output, path_value};
use crate::error::StepError;
use crate::io::fs::{is_executable, rel_string, walk_files};
use crate::paths::VCS_DIRS;

/// Check that a produced file-set matches what the package declares.
/// Passes the folder through unchanged.
pub struct Validate;

#[derive(Debug, Default)]
struct Expectations {
    files: Vec<String>,
    executables: Vec<String>,
    min_files: Option<u64>,
}

fn check(root: &Path, expect: &Expectations) -> Result<(), StepError> {
    let present: Vec<String> = walk_files(root, VCS_DIRS)?
        .iter()
        .map(|f| rel_string(&f.relative))
        .collect();
    let mut problems = Vec::new();

    if let Some(min) = expect.min_files {
        if (present.len() as u64) < min {
            problems.push(format!("expected at least {min} file(s), found {}", present.len()));
        }
    }
    for pattern in &expect.files {
        let glob = Pattern::new(pattern)
            .map_err(|e| StepError::input("files", format!("bad glob '{pattern}': {e}")))?;
        if !present.iter().any(|p| glob.matches(p)) {
            problems.push(format!("no file matches '{pattern}'"));
        }
    }
    for exe in &expect.executables {
        let path = root.join(exe);
        if !path.is_file() {
            problems.push(format!("missing executable '{exe}'"));
        } else if !is_executable(&path) {
            problems.push(format!("'{exe}' is not executable"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(StepError::Validation(problems.join("; ")))
    }
}

#[async_trait]
impl Step for Validate {
    fn kind(&self) -> &'static str {
        "validate"
    }

    fn requires(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[
            Port::required("folder_path", ValueKind::Path),
            Port::optional("files", ValueKind::List),
            Port::optional("executables", ValueKind::List),
            Port::optional("min_files", ValueKind::Integer),
        ];
        PORTS
    }

    fn provides(&self) -> &'static [Port] {
        const PORTS: &[Port] = &[Port::required("folder_path", ValueKind::Path)];
        PORTS
    }

    async fn run(&self, _ctx: &StepContext<'_>, inputs: &Inputs) -> Result<Outputs, StepError> {
        let root = inputs.path("folder_path")?;
        let expect = Expectations {
            files: inputs.str_list("files")?,
            executables: inputs.str_list("executables")?,
            min_files: inputs.opt_u64("min_files")?,
        };
        let task_root = root.clone();
        tokio::task::spawn_blocking(move || check(&task_root, &expect))
            .await
            .map_err(|e| StepError::Other(format!("validation task failed: {e}")))??;
        Ok(output("folder_path", path_value(&root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_reports_every_problem() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("bin")).unwrap();
        fs::write(tmp.path().join("bin/tool"), "x").unwrap();

        let expect = Expectations {
            files: vec!["bin/*".into(), "*.md".into()],
            executables: vec!["bin/missing".into()],
            min_files: Some(2),
        };
        let err = check(tmp.path(), &expect).unwrap_err().to_string();
        assert!(err.contains("at least 2"));
        assert!(err.contains("'*.md'"));
        assert!(err.contains("bin/missing"));
        assert!(!err.contains("bin/*"));
    }

    #[test]
    fn test_passes_matching_tree() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("README.md"), "x").unwrap();
        let expect = Expectations {
            files: vec!["README.md".into()],
            ..Default::default()
        };
        assert!(check(tmp.path(), &expect).is_ok());
    }
}
