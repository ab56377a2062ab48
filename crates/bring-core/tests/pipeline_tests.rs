//! Integration tests: pipeline_tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bring_core::io::extract::ExtractError;
use bring_core::pipeline::Pipeline;
use bring_core::{BringConfig, BringContext, BringError, StepError};
use bring_schema::{StepSpec, Vars};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::TempDir;

fn context(home: &Path) -> Arc<BringContext> {
    BringContext::builder(BringConfig::with_home(home))
        .build()
        .expect("context")
}

fn tarball(dir: &Path, name: &str, entries: &[(&str, &str)]) -> std::path::PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (entry, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, entry, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn vars(pairs: &[(&str, serde_json::Value)]) -> Vars {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

fn workspace_entries(home: &Path) -> usize {
    fs::read_dir(home.join("workspace")).map_or(0, Iterator::count)
}

#[test]
fn test_unsatisfied_input_fails_before_anything_runs() {
    let home = TempDir::new().unwrap();
    let ctx = context(home.path());

    let err = Pipeline::plan(&ctx.steps, "broken", &[StepSpec::new("extract")], Vars::new()).unwrap_err();
    match err {
        BringError::PipelineWiring { step, kind, message } => {
            assert_eq!(step, 0);
            assert_eq!(kind, "extract");
            assert!(message.contains("file_path"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!home.path().join("workspace").exists());
}

#[test]
fn test_input_produced_by_later_step_is_rejected() {
    let home = TempDir::new().unwrap();
    let ctx = context(home.path());
    let steps = [
        StepSpec::new("extract"),
        StepSpec::new("download").with("url", "https://example.invalid/a.tar.gz"),
    ];
    assert!(matches!(
        Pipeline::plan(&ctx.steps, "order", &steps, Vars::new()),
        Err(BringError::PipelineWiring { step: 0, .. })
    ));
}

#[tokio::test]
async fn test_single_root_archive_is_stripped() {
    let home = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let ctx = context(home.path());
    let archive = tarball(
        files.path(),
        "tool-1.0.tar.gz",
        &[("tool-1.0/bin/tool", "#!/bin/sh\n"), ("tool-1.0/README", "hi")],
    );

    let pipeline = Pipeline::plan(
        &ctx.steps,
        "extract",
        &[StepSpec::new("extract")],
        vars(&[("file_path", json!(archive.to_string_lossy()))]),
    )
    .unwrap();
    let output = pipeline.run(&ctx).await.unwrap();
    let root = output.folder_path().unwrap();
    assert!(root.ends_with("tool-1.0"));
    assert!(root.join("bin/tool").is_file());
}

#[tokio::test]
async fn test_ambiguous_archive_fails_and_cleans_up() {
    let home = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let ctx = context(home.path());
    let archive = tarball(files.path(), "two.tar.gz", &[("a/x", "1"), ("b/y", "2")]);

    let pipeline = Pipeline::plan(
        &ctx.steps,
        "extract",
        &[StepSpec::new("extract")],
        vars(&[("file_path", json!(archive.to_string_lossy()))]),
    )
    .unwrap();
    let err = pipeline.run(&ctx).await.unwrap_err();
    assert!(matches!(
        err,
        BringError::StepExecution {
            source: StepError::Extract(ExtractError::AmbiguousRoot { entries: 2 }),
            ..
        }
    ));
    assert!(err.remedy().unwrap().contains("remove_root"));
    assert_eq!(workspace_entries(home.path()), 0);
}

#[tokio::test]
async fn test_explicit_remove_root_false_keeps_both_entries() {
    let home = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let ctx = context(home.path());
    let archive = tarball(files.path(), "two.tar.gz", &[("a/x", "1"), ("b/y", "2")]);

    let pipeline = Pipeline::plan(
        &ctx.steps,
        "extract",
        &[StepSpec::new("extract").with("remove_root", false)],
        vars(&[("file_path", json!(archive.to_string_lossy()))]),
    )
    .unwrap();
    let output = pipeline.run(&ctx).await.unwrap();
    let root = output.folder_path().unwrap();
    assert!(root.join("a/x").is_file());
    assert!(root.join("b/y").is_file());
}

#[tokio::test]
async fn test_only_final_directory_outlives_the_run() {
    let home = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    fs::create_dir_all(src.path().join("bin")).unwrap();
    fs::create_dir_all(src.path().join("docs")).unwrap();
    fs::write(src.path().join("bin/tool"), "t").unwrap();
    fs::write(src.path().join("docs/guide.md"), "g").unwrap();
    let ctx = context(home.path());

    let steps = [
        StepSpec::new("folder").with("path", src.path().to_string_lossy().into_owned()),
        StepSpec::new("transform").with("include", json!(["bin/*"])),
        StepSpec::new("validate").with("files", json!(["bin/tool"])).with("min_files", 1),
    ];
    let output = Pipeline::plan(&ctx.steps, "chain", &steps, Vars::new())
        .unwrap()
        .run(&ctx)
        .await
        .unwrap();

    let root = output.folder_path().unwrap().to_path_buf();
    assert!(root.join("bin/tool").is_file());
    assert!(!root.join("docs").exists());
    assert_eq!(workspace_entries(home.path()), 1);

    drop(output);
    assert!(!root.exists());
    assert_eq!(workspace_entries(home.path()), 0);
}

#[tokio::test]
async fn test_validation_failure_names_missing_files() {
    let home = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("README"), "r").unwrap();
    let ctx = context(home.path());

    let steps = [
        StepSpec::new("folder").with("path", src.path().to_string_lossy().into_owned()),
        StepSpec::new("validate").with("files", json!(["bin/tool"])),
    ];
    let err = Pipeline::plan(&ctx.steps, "validate", &steps, Vars::new())
        .unwrap()
        .run(&ctx)
        .await
        .unwrap_err();
    match err {
        BringError::StepExecution { step, source: StepError::Validation(msg), .. } => {
            assert_eq!(step, 1);
            assert!(msg.contains("bin/tool"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cancelled_context_stops_before_first_step() {
    let home = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    let token = tokio_util::sync::CancellationToken::new();
    let ctx = BringContext::builder(BringConfig::with_home(home.path()))
        .cancel(token.clone())
        .build()
        .unwrap();
    token.cancel();

    let steps = [StepSpec::new("folder").with("path", src.path().to_string_lossy().into_owned())];
    let err = Pipeline::plan(&ctx.steps, "cancel", &steps, Vars::new())
        .unwrap()
        .run(&ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, BringError::Cancelled));
}

fn folder_step(dir: &Path) -> serde_json::Value {
    json!({ "kind": "folder", "path": dir.to_string_lossy() })
}

#[tokio::test]
async fn test_merge_pipelines_combines_parts() {
    let home = TempDir::new().unwrap();
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    fs::write(a.path().join("one"), "1").unwrap();
    fs::write(b.path().join("two"), "2").unwrap();
    let ctx = context(home.path());

    let steps = [StepSpec::new("merge_pipelines")
        .with(
            "pipelines",
            json!([
                { "steps": [folder_step(a.path())] },
                { "steps": [folder_step(b.path())] },
            ]),
        )
        .with("parallelism", 1)];
    let output = Pipeline::plan(&ctx.steps, "merged", &steps, Vars::new())
        .unwrap()
        .run(&ctx)
        .await
        .unwrap();

    assert_eq!(output.vars["folder_paths"].as_array().unwrap().len(), 2);
    let merged = output.folder_path().unwrap().to_path_buf();
    assert_eq!(fs::read_to_string(merged.join("one")).unwrap(), "1");
    assert_eq!(fs::read_to_string(merged.join("two")).unwrap(), "2");
    assert_eq!(workspace_entries(home.path()), 1);

    drop(output);
    assert_eq!(workspace_entries(home.path()), 0);
}

#[tokio::test]
async fn test_merge_pipelines_reports_first_failure_and_cleans_up() {
    let home = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let good = TempDir::new().unwrap();
    fs::write(good.path().join("ok"), "ok").unwrap();
    let archive = tarball(files.path(), "two.tar.gz", &[("a/x", "1"), ("b/y", "2")]);
    let ctx = context(home.path());

    let steps = [StepSpec::new("merge_pipelines").with(
        "pipelines",
        json!([
            {
                "steps": [{ "kind": "extract" }],
                "vars": { "file_path": archive.to_string_lossy() },
            },
            { "steps": [folder_step(good.path())] },
        ]),
    )];
    let err = Pipeline::plan(&ctx.steps, "merged", &steps, Vars::new())
        .unwrap()
        .run(&ctx)
        .await
        .unwrap_err();

    match err {
        BringError::StepExecution { source: StepError::Nested { index, source }, .. } => {
            assert_eq!(index, 0);
            assert!(matches!(
                *source,
                BringError::StepExecution {
                    source: StepError::Extract(ExtractError::AmbiguousRoot { .. }),
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(workspace_entries(home.path()), 0);
}

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=bring", "-c", "user.email=bring@localhost", "-c", "commit.gpgsign=false"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn commit(repo: &Path, content: &str) {
    fs::write(repo.join("VERSION"), content).unwrap();
    git(repo, &["add", "VERSION"]);
    git(repo, &["commit", "-q", "-m", content]);
}

async fn export_version(ctx: &BringContext, repo: &Path) -> String {
    let steps = [StepSpec::new("git_export")
        .with("url", repo.to_string_lossy().into_owned())
        .with("ref", "main")];
    let output = Pipeline::plan(&ctx.steps, "git", &steps, Vars::new())
        .unwrap()
        .run(ctx)
        .await
        .unwrap();
    fs::read_to_string(output.folder_path().unwrap().join("VERSION")).unwrap()
}

#[tokio::test]
async fn test_git_export_follows_branch_updates() {
    if which::which("git").is_err() {
        return;
    }
    let home = TempDir::new().unwrap();
    let upstream = TempDir::new().unwrap();
    git(upstream.path(), &["init", "-q"]);
    git(upstream.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    commit(upstream.path(), "1");
    let ctx = context(home.path());

    assert_eq!(export_version(&ctx, upstream.path()).await, "1");
    commit(upstream.path(), "2");
    assert_eq!(export_version(&ctx, upstream.path()).await, "2");
}

#[tokio::test]
async fn test_concurrent_downloads_of_one_url_fetch_once() {
    let mut server = mockito::Server::new_async().await;
    let asset = server
        .mock("GET", "/dl/tool.tar.gz")
        .with_body("payload")
        .expect(1)
        .create_async()
        .await;
    let url = format!("{}/dl/tool.tar.gz", server.url());
    let home = TempDir::new().unwrap();
    let ctx = context(home.path());

    let steps = [StepSpec::new("download").with("url", url.as_str())];
    let first = Pipeline::plan(&ctx.steps, "first", &steps, Vars::new()).unwrap();
    let second = Pipeline::plan(&ctx.steps, "second", &steps, Vars::new()).unwrap();
    let (a, b) = tokio::join!(first.run(&ctx), second.run(&ctx));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.file_path(), b.file_path());
    assert_eq!(fs::read_to_string(a.file_path().unwrap()).unwrap(), "payload");
    asset.assert_async().await;
}
