use anyhow::{Context, Result};
use async_trait::async_trait;
use bring_schema::{PkgVersion, SourceDescription, StepSpec, Vars};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use super::{Resolved, Resolver, fields};
use crate::context::BringContext;
use crate::io::process::run_tool;

#[derive(Debug, Deserialize)]
struct GitSource {
    url: String,
    #[serde(default)]
    tag_filter: Option<String>,
}

/// A git repository: one version per tag and per branch.
pub struct GitResolver;

/// Parse a tag name as semver, tolerating a leading `v`.
pub(crate) fn parse_semver(tag: &str) -> Option<semver::Version> {
    semver::Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}

/// Order tags: semver tags newest first, then the rest in listing order.
pub(crate) fn sort_tags(tags: Vec<String>) -> Vec<String> {
    let (mut semvers, others): (Vec<_>, Vec<_>) = tags
        .into_iter()
        .map(|t| (parse_semver(&t), t))
        .partition(|(v, _)| v.is_some());
    semvers.sort_by(|(a, _), (b, _)| b.cmp(a));
    semvers
        .into_iter()
        .chain(others)
        .map(|(_, t)| t)
        .collect()
}

fn parse_ls_remote(output: &str, url: &str, filter: Option<&Regex>) -> Vec<PkgVersion> {
    let mut tags = Vec::new();
    let mut branches = Vec::new();
    let mut commits = std::collections::HashMap::new();
    for line in output.lines() {
        let Some((sha, reference)) = line.split_once('\t') else {
            continue;
        };
        if reference.ends_with("^{}") {
            continue;
        }
        if let Some(tag) = reference.strip_prefix("refs/tags/") {
            if filter.is_none_or(|re| re.is_match(tag)) {
                tags.push(tag.to_string());
                commits.insert(tag.to_string(), sha.to_string());
            }
        } else if let Some(branch) = reference.strip_prefix("refs/heads/") {
            branches.push(branch.to_string());
            commits.insert(branch.to_string(), sha.to_string());
        }
    }

    let version = |name: &str, ref_type: &str| {
        let mut vars = Vars::new();
        vars.insert("version".to_string(), json!(name));
        let step = StepSpec::new("git_export")
            .with("url", url)
            .with("ref", "{{ version }}");
        let mut v = PkgVersion::new(vars, vec![step]).with_metadata("ref_type", ref_type);
        if let Some(sha) = commits.get(name) {
            v = v.with_metadata("commit", sha.as_str());
        }
        if parse_semver(name).is_some_and(|s| !s.pre.is_empty()) {
            v = v.with_metadata("prerelease", true);
        }
        v
    };

    let mut versions: Vec<PkgVersion> = sort_tags(tags).iter().map(|t| version(t, "tag")).collect();
    versions.extend(branches.iter().map(|b| version(b, "branch")));
    versions
}

#[async_trait]
impl Resolver for GitResolver {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn resolve(&self, _ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: GitSource = fields(source)?;
        let filter = cfg
            .tag_filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid tag_filter")?;
        let stdout = run_tool("git", ["ls-remote", "--tags", "--heads", cfg.url.as_str()], None)
            .await
            .with_context(|| format!("failed to list refs of {}", cfg.url))?;
        let versions = parse_ls_remote(&String::from_utf8_lossy(&stdout), &cfg.url, filter.as_ref());
        Ok(Resolved::new(versions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LS_REMOTE: &str = "\
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/tags/v1.2.0
3333333333333333333333333333333333333333\trefs/tags/v1.2.0^{}
4444444444444444444444444444444444444444\trefs/tags/v1.10.0
5555555555555555555555555555555555555555\trefs/tags/nightly
6666666666666666666666666666666666666666\trefs/tags/v2.0.0-rc.1
";

    fn versions_of(filter: Option<&str>) -> Vec<String> {
        let re = filter.map(|f| Regex::new(f).unwrap());
        parse_ls_remote(LS_REMOTE, "https://example.com/r.git", re.as_ref())
            .iter()
            .map(|v| v.version_string().unwrap())
            .collect()
    }

    #[test]
    fn test_tags_sorted_semver_desc_then_others_then_branches() {
        assert_eq!(
            versions_of(None),
            vec!["v2.0.0-rc.1", "v1.10.0", "v1.2.0", "nightly", "main"]
        );
    }

    #[test]
    fn test_tag_filter() {
        assert_eq!(versions_of(Some(r"^v1\.")), vec!["v1.10.0", "v1.2.0", "main"]);
    }

    #[test]
    fn test_version_steps_and_metadata() {
        let versions = parse_ls_remote(LS_REMOTE, "https://example.com/r.git", None);
        let rc = &versions[0];
        assert_eq!(rc.metadata["prerelease"], true);
        assert_eq!(rc.steps[0].kind, "git_export");
        assert_eq!(rc.steps[0].get("ref").unwrap(), "{{ version }}");
        assert_eq!(versions[1].metadata["commit"], "4444444444444444444444444444444444444444");
    }
}
