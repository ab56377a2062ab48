//! Scored matching of requested variables against a catalog.

use bring_schema::{Aliases, Catalog, PkgVersion, Vars, scalar_matches, scalar_to_string};
use serde_json::Value;

/// Replace alias values in `requested` with their canonical values.
/// Values without an alias pass through unchanged.
pub fn translate(requested: &Vars, aliases: &Aliases) -> Vars {
    requested
        .iter()
        .map(|(key, value)| {
            let table = aliases.get(key);
            let canonical = |v: &Value| -> Value {
                table
                    .and_then(|t| t.get(&scalar_to_string(v)))
                    .cloned()
                    .unwrap_or_else(|| v.clone())
            };
            let translated = match value {
                Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
                other => canonical(other),
            };
            (key.clone(), translated)
        })
        .collect()
}

/// Score of `version` against an already translated request, or `None` if
/// one of the version's variables contradicts the request.
pub fn score(version: &PkgVersion, requested: &Vars) -> Option<usize> {
    let mut matched = 0;
    for (key, actual) in &version.variables {
        if let Some(wanted) = requested.get(key) {
            if !scalar_matches(wanted, actual) {
                return None;
            }
            matched += 1;
        }
    }
    Some(matched)
}

/// Select the version best matching `requested`.
///
/// An empty request selects the first version. Otherwise the version with
/// the most matching variables wins; ties go to the earliest in catalog
/// order. Returns `None` if every version contradicts the request.
pub fn find<'c>(requested: &Vars, catalog: &'c Catalog) -> Option<&'c PkgVersion> {
    if requested.is_empty() {
        return catalog.versions.first();
    }
    let requested = translate(requested, &catalog.aliases);
    let mut best: Option<(usize, &PkgVersion)> = None;
    for version in &catalog.versions {
        let Some(s) = score(version, &requested) else {
            continue;
        };
        if best.is_none_or(|(top, _)| s > top) {
            best = Some((s, version));
        }
    }
    best.map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bring_schema::{ArgSchema, StepSpec};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn version(pairs: &[(&str, &str)]) -> PkgVersion {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        PkgVersion::new(vars, vec![StepSpec::new("folder")])
    }

    fn catalog(versions: Vec<PkgVersion>) -> Catalog {
        Catalog {
            source_id: "test".into(),
            resolver: "test".into(),
            versions,
            aliases: Aliases::new(),
            args: ArgSchema::new(),
            built_at: Utc::now(),
        }
    }

    fn vars(pairs: &[(&str, Value)]) -> Vars {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_most_specific_match_wins() {
        let cat = catalog(vec![
            version(&[("os", "linux"), ("arch", "x64")]),
            version(&[("os", "linux"), ("arch", "arm64")]),
        ]);
        let picked = find(&vars(&[("os", json!("linux")), ("arch", json!("arm64"))]), &cat).unwrap();
        assert_eq!(picked, &cat.versions[1]);
    }

    #[test]
    fn test_ties_go_to_catalog_order() {
        let cat = catalog(vec![
            version(&[("os", "linux"), ("arch", "x64")]),
            version(&[("os", "linux"), ("arch", "arm64")]),
        ]);
        let request = vars(&[("os", json!("linux"))]);
        for _ in 0..10 {
            assert_eq!(find(&request, &cat).unwrap(), &cat.versions[0]);
        }
    }

    #[test]
    fn test_conflicts_exclude_versions() {
        let cat = catalog(vec![version(&[("os", "linux")]), version(&[("os", "darwin")])]);
        assert_eq!(find(&vars(&[("os", json!("darwin"))]), &cat).unwrap(), &cat.versions[1]);
        assert!(find(&vars(&[("os", json!("plan9"))]), &cat).is_none());
    }

    #[test]
    fn test_variable_free_version_matches_anything() {
        let cat = catalog(vec![version(&[])]);
        assert_eq!(find(&vars(&[("os", json!("linux"))]), &cat).unwrap(), &cat.versions[0]);
    }

    #[test]
    fn test_empty_request_returns_first() {
        let cat = catalog(vec![version(&[("version", "2")]), version(&[("version", "1")])]);
        assert_eq!(find(&Vars::new(), &cat).unwrap(), &cat.versions[0]);
    }

    #[test]
    fn test_list_request_matches_members() {
        let cat = catalog(vec![version(&[("arch", "x64")]), version(&[("arch", "arm64")])]);
        let picked = find(&vars(&[("arch", json!(["riscv", "arm64"]))]), &cat).unwrap();
        assert_eq!(picked, &cat.versions[1]);
    }

    #[test]
    fn test_alias_and_canonical_select_the_same_version() {
        let mut cat = catalog(vec![version(&[("version", "2.0")]), version(&[("version", "1.0")])]);
        let mut table = BTreeMap::new();
        table.insert("old".to_string(), json!("1.0"));
        cat.aliases.insert("version".to_string(), table);

        let by_alias = find(&vars(&[("version", json!("old"))]), &cat).unwrap();
        let by_value = find(&vars(&[("version", json!("1.0"))]), &cat).unwrap();
        assert_eq!(by_alias, by_value);
        assert_eq!(by_alias, &cat.versions[1]);
    }
}
