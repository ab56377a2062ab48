//! Integration tests: catalog_tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bring_core::resolver::{Resolved, Resolver};
use bring_core::{BringConfig, BringContext, BringError};
use bring_schema::{PkgVersion, SourceDescription, StepSpec, Vars};
use serde_json::json;
use tempfile::TempDir;

/// Counts calls; optionally fails or sleeps to expose races.
#[derive(Default)]
struct CountingResolver {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay_ms: u64,
}

#[async_trait]
impl Resolver for CountingResolver {
    fn kind(&self) -> &'static str {
        "counting"
    }

    async fn resolve(&self, _ctx: &BringContext, _source: &SourceDescription) -> anyhow::Result<Resolved> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("upstream unavailable");
        }
        let version = |v: &str| {
            let mut vars = Vars::new();
            vars.insert("version".into(), json!(v));
            PkgVersion::new(
                vars,
                vec![StepSpec::new("download").with("url", "https://dl.example/{{ version }}.tar.gz")],
            )
        };
        Ok(Resolved::new(vec![version("2.0.0-rc.1"), version("1.9.0")]))
    }
}

fn context(home: &Path, resolver: Arc<CountingResolver>) -> Arc<BringContext> {
    BringContext::builder(BringConfig::with_home(home))
        .resolver(resolver)
        .build()
        .unwrap()
}

fn source() -> SourceDescription {
    SourceDescription::new("counting").with("name", "tool")
}

#[tokio::test]
async fn test_fresh_entry_is_reused() {
    let home = TempDir::new().unwrap();
    let resolver = Arc::new(CountingResolver::default());
    let ctx = context(home.path(), resolver.clone());

    let first = ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    let second = ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);

    let path = ctx.cache.path_for(&ctx, &source()).unwrap();
    assert!(path.starts_with(home.path().join("cache/metadata/counting")));
    assert!(path.is_file());
}

#[tokio::test]
async fn test_max_age_policy() {
    let home = TempDir::new().unwrap();
    let resolver = Arc::new(CountingResolver::default());
    let ctx = context(home.path(), resolver.clone());

    ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    ctx.cache.get_or_refresh(&ctx, &source(), 0, false).await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

    ctx.cache.get_or_refresh(&ctx, &source(), -1, false).await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

    ctx.cache.get_or_refresh(&ctx, &source(), -1, true).await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);

    ctx.cache.invalidate(&ctx, &source()).unwrap();
    ctx.cache.get_or_refresh(&ctx, &source(), -1, false).await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_catalog_is_post_processed() {
    let home = TempDir::new().unwrap();
    let ctx = context(home.path(), Arc::new(CountingResolver::default()));

    let catalog = ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    assert_eq!(catalog.resolver, "counting");
    assert_eq!(catalog.aliases["version"]["latest"], json!("1.9.0"));
    assert_eq!(
        catalog.versions[1].steps[0].get("url").unwrap(),
        "https://dl.example/1.9.0.tar.gz"
    );
    assert_eq!(catalog.args["version"].allowed, vec![json!("2.0.0-rc.1"), json!("1.9.0")]);
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_resolve() {
    let home = TempDir::new().unwrap();
    let resolver = Arc::new(CountingResolver {
        delay_ms: 50,
        ..CountingResolver::default()
    });
    let ctx = context(home.path(), resolver.clone());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_entry() {
    let home = TempDir::new().unwrap();
    let resolver = Arc::new(CountingResolver::default());
    let ctx = context(home.path(), resolver.clone());

    let good = ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    resolver.fail.store(true, Ordering::SeqCst);

    let err = ctx.cache.get_or_refresh(&ctx, &source(), 3600, true).await.unwrap_err();
    match &err {
        BringError::Resolution { source_id, cause } => {
            assert!(source_id.starts_with("counting-"));
            assert!(cause.to_string().contains("upstream unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let cached = ctx.cache.get_or_refresh(&ctx, &source(), 3600, false).await.unwrap();
    assert_eq!(cached, good);
}

#[tokio::test]
async fn test_unknown_source_kind_is_a_config_error() {
    let home = TempDir::new().unwrap();
    let ctx = BringContext::builder(BringConfig::with_home(home.path())).build().unwrap();
    let err = ctx
        .cache
        .get_or_refresh(&ctx, &SourceDescription::new("svn"), 3600, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BringError::Config(msg) if msg.contains("svn")));
}
