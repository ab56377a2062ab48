//! Release-API resolvers: GitHub releases, GitLab releases and GitHub raw files.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bring_schema::{AssetPlatform, PkgVersion, SourceDescription, StepSpec, Vars};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::git::sort_tags;
use super::{Resolved, Resolver, fields};
use crate::context::BringContext;
use crate::io::http::{Auth, Retry, get_json};

const AUX_SUFFIXES: &[&str] = &[
    ".sha256", ".sha256sum", ".sha512", ".md5", ".sig", ".asc", ".pem", ".sbom", ".spdx",
    ".json", ".txt", ".deb", ".rpm", ".apk", ".msi", ".pkg",
];

/// Checksums, signatures and OS packages are never installable assets.
fn is_auxiliary(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("checksum") || AUX_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

fn retry(ctx: &BringContext) -> Retry {
    Retry {
        attempts: ctx.config.download_retries,
        delay: ctx.config.retry_delay,
    }
}

fn compile_filter(filter: Option<&str>, field: &str) -> Result<Option<Regex>> {
    filter
        .map(Regex::new)
        .transpose()
        .with_context(|| format!("invalid {field}"))
}

/// A release asset, independent of the forge it came from.
#[derive(Debug, Clone)]
struct Asset {
    name: String,
    url: String,
    sha256: Option<String>,
}

/// A release, independent of the forge it came from.
#[derive(Debug, Clone)]
struct Release {
    tag: String,
    prerelease: bool,
    published_at: Option<String>,
    assets: Vec<Asset>,
}

/// One version per (release, asset); `os`/`arch` are added when the asset
/// name reveals them, and `asset` when two assets of a release would
/// otherwise be indistinguishable.
fn release_versions(releases: &[Release], filter: Option<&Regex>) -> Vec<PkgVersion> {
    let mut versions = Vec::new();
    for release in releases {
        let assets: Vec<(&Asset, AssetPlatform)> = release
            .assets
            .iter()
            .filter(|a| match filter {
                Some(re) => re.is_match(&a.name),
                None => !is_auxiliary(&a.name),
            })
            .map(|a| (a, AssetPlatform::from_filename(&a.name)))
            .collect();

        let mut seen: HashMap<(Option<&str>, Option<&str>), usize> = HashMap::new();
        for (_, platform) in &assets {
            let key = (platform.os.map(|o| o.as_str()), platform.arch.map(|a| a.as_str()));
            *seen.entry(key).or_default() += 1;
        }
        let ambiguous = seen.values().any(|n| *n > 1);

        let version = release.tag.strip_prefix('v').unwrap_or(&release.tag);
        for (asset, platform) in assets {
            let mut vars = Vars::new();
            vars.insert("version".to_string(), json!(version));
            if let Some(os) = platform.os {
                vars.insert("os".to_string(), json!(os.as_str()));
            }
            if let Some(arch) = platform.arch {
                vars.insert("arch".to_string(), json!(arch.as_str()));
            }
            if ambiguous {
                vars.insert("asset".to_string(), json!(asset.name));
            }

            let mut download = StepSpec::new("download")
                .with("url", asset.url.as_str())
                .with("target_file", asset.name.as_str());
            if let Some(sha) = &asset.sha256 {
                download = download.with("sha256", sha.as_str());
            }
            let mut v = PkgVersion::new(vars, vec![download, StepSpec::new("extract")])
                .with_metadata("tag", release.tag.as_str())
                .with_metadata("asset", asset.name.as_str())
                .with_metadata("prerelease", release.prerelease);
            if let Some(date) = &release.published_at {
                v = v.with_metadata("published_at", date.as_str());
            }
            versions.push(v);
        }
    }
    versions
}

#[derive(Debug, Deserialize)]
struct GithubReleaseSource {
    user: String,
    repo: String,
    #[serde(default)]
    asset_filter: Option<String>,
    #[serde(default)]
    include_prereleases: bool,
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<GhAsset>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    digest: Option<String>,
}

fn github_auth(ctx: &BringContext) -> Auth<'_> {
    ctx.config
        .github_token
        .as_deref()
        .map_or(Auth::None, Auth::Bearer)
}

/// Binary assets attached to GitHub releases.
pub struct GithubReleaseResolver;

#[async_trait]
impl Resolver for GithubReleaseResolver {
    fn kind(&self) -> &'static str {
        "github_release"
    }

    async fn resolve(&self, ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: GithubReleaseSource = fields(source)?;
        let filter = compile_filter(cfg.asset_filter.as_deref(), "asset_filter")?;
        let url = format!(
            "{}/repos/{}/{}/releases?per_page=100",
            ctx.config.github_api, cfg.user, cfg.repo
        );
        let raw: Vec<GhRelease> = get_json(&ctx.client, &url, github_auth(ctx), retry(ctx)).await?;
        debug!(url, releases = raw.len(), "fetched github releases");

        let releases: Vec<Release> = raw
            .into_iter()
            .filter(|r| !r.draft && (cfg.include_prereleases || !r.prerelease))
            .map(|r| Release {
                tag: r.tag_name,
                prerelease: r.prerelease,
                published_at: r.published_at,
                assets: r
                    .assets
                    .into_iter()
                    .map(|a| Asset {
                        sha256: a
                            .digest
                            .and_then(|d| d.strip_prefix("sha256:").map(str::to_string)),
                        name: a.name,
                        url: a.browser_download_url,
                    })
                    .collect(),
            })
            .collect();
        Ok(Resolved::new(release_versions(&releases, filter.as_ref())))
    }
}

#[derive(Debug, Deserialize)]
struct GitlabReleaseSource {
    project: String,
    #[serde(default)]
    asset_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlRelease {
    tag_name: String,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default)]
    released_at: Option<String>,
    #[serde(default)]
    assets: GlAssets,
}

#[derive(Debug, Default, Deserialize)]
struct GlAssets {
    #[serde(default)]
    links: Vec<GlLink>,
}

#[derive(Debug, Deserialize)]
struct GlLink {
    name: String,
    url: String,
    #[serde(default)]
    direct_asset_url: Option<String>,
}

/// Asset links attached to GitLab releases.
pub struct GitlabReleaseResolver;

#[async_trait]
impl Resolver for GitlabReleaseResolver {
    fn kind(&self) -> &'static str {
        "gitlab_release"
    }

    async fn resolve(&self, ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: GitlabReleaseSource = fields(source)?;
        let filter = compile_filter(cfg.asset_filter.as_deref(), "asset_filter")?;
        let url = format!(
            "{}/projects/{}/releases?per_page=100",
            ctx.config.gitlab_api,
            cfg.project.replace('/', "%2F")
        );
        let auth = ctx
            .config
            .gitlab_token
            .as_deref()
            .map_or(Auth::None, |t| Auth::Header("PRIVATE-TOKEN", t));
        let raw: Vec<GlRelease> = get_json(&ctx.client, &url, auth, retry(ctx)).await?;

        let releases: Vec<Release> = raw
            .into_iter()
            .filter(|r| !r.upcoming_release)
            .map(|r| Release {
                prerelease: crate::catalog::looks_prerelease(&r.tag_name),
                tag: r.tag_name,
                published_at: r.released_at,
                assets: r
                    .assets
                    .links
                    .into_iter()
                    .map(|l| Asset {
                        url: l.direct_asset_url.unwrap_or(l.url),
                        name: l.name,
                        sha256: None,
                    })
                    .collect(),
            })
            .collect();
        Ok(Resolved::new(release_versions(&releases, filter.as_ref())))
    }
}

#[derive(Debug, Deserialize)]
struct GithubFilesSource {
    user: String,
    repo: String,
    files: Vec<String>,
    #[serde(default)]
    tag_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhTag {
    name: String,
}

/// Individual files of a GitHub repository, one version per tag.
pub struct GithubFilesResolver;

#[async_trait]
impl Resolver for GithubFilesResolver {
    fn kind(&self) -> &'static str {
        "github_files"
    }

    async fn resolve(&self, ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: GithubFilesSource = fields(source)?;
        let filter = compile_filter(cfg.tag_filter.as_deref(), "tag_filter")?;
        let url = format!(
            "{}/repos/{}/{}/tags?per_page=100",
            ctx.config.github_api, cfg.user, cfg.repo
        );
        let tags: Vec<GhTag> = get_json(&ctx.client, &url, github_auth(ctx), retry(ctx)).await?;
        let names: Vec<String> = tags
            .into_iter()
            .map(|t| t.name)
            .filter(|n| filter.as_ref().is_none_or(|re| re.is_match(n)))
            .collect();

        let urls: Vec<Value> = cfg
            .files
            .iter()
            .map(|file| {
                json!(format!(
                    "{}/{}/{}/{{{{ version }}}}/{}",
                    ctx.config.github_raw,
                    cfg.user,
                    cfg.repo,
                    file.trim_start_matches('/')
                ))
            })
            .collect();
        let versions = sort_tags(names)
            .into_iter()
            .map(|tag| {
                let mut vars = Vars::new();
                vars.insert("version".to_string(), json!(tag));
                let step = StepSpec::new("download_multiple").with("urls", urls.clone());
                PkgVersion::new(vars, vec![step])
            })
            .collect();
        Ok(Resolved::new(versions))
    }
}
