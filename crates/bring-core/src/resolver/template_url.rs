use std::collections::BTreeMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bring_schema::{PkgVersion, SourceDescription, StepSpec, Vars};
use serde::Deserialize;
use serde_json::Value;

use super::{Resolved, Resolver, fields};
use crate::context::BringContext;

#[derive(Debug, Deserialize)]
struct TemplateUrlSource {
    url: String,
    template_values: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    target_name: Option<String>,
}

/// A URL template expanded over every combination of its variable domains.
pub struct TemplateUrlResolver;

/// Cartesian product of `domains`: the first key varies slowest, values keep
/// their declared order.
fn combinations(domains: &BTreeMap<String, Vec<Value>>) -> Vec<Vars> {
    domains.iter().fold(vec![Vars::new()], |acc, (key, values)| {
        acc.iter()
            .flat_map(|partial| {
                values.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect()
    })
}

#[async_trait]
impl Resolver for TemplateUrlResolver {
    fn kind(&self) -> &'static str {
        "template_url"
    }

    async fn resolve(&self, _ctx: &BringContext, source: &SourceDescription) -> Result<Resolved> {
        let cfg: TemplateUrlSource = fields(source)?;
        if let Some((key, _)) = cfg.template_values.iter().find(|(_, v)| v.is_empty()) {
            bail!("template_values.{key} has no values");
        }

        let mut extract = StepSpec::new("extract");
        if let Some(name) = &cfg.target_name {
            extract = extract.with("target_name", name.as_str());
        }
        let versions = combinations(&cfg.template_values)
            .into_iter()
            .map(|vars| {
                let download = StepSpec::new("download").with("url", cfg.url.as_str());
                PkgVersion::new(vars, vec![download, extract.clone()])
            })
            .collect();
        Ok(Resolved::new(versions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cartesian_order() {
        let mut domains = BTreeMap::new();
        domains.insert("arch".to_string(), vec![json!("x64"), json!("arm64")]);
        domains.insert("version".to_string(), vec![json!("1.1"), json!("1.0")]);
        let combos: Vec<String> = combinations(&domains)
            .iter()
            .map(bring_schema::format_vars)
            .collect();
        assert_eq!(
            combos,
            vec![
                "arch=x64, version=1.1",
                "arch=x64, version=1.0",
                "arch=arm64, version=1.1",
                "arch=arm64, version=1.0",
            ]
        );
    }

    #[test]
    fn test_empty_domains_give_one_version() {
        assert_eq!(combinations(&BTreeMap::new()), vec![Vars::new()]);
    }
}
