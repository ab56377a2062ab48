//! Derivation of the user-facing argument schema from a catalog.

use std::collections::BTreeMap;

use bring_schema::{Aliases, ArgOverride, ArgSchema, ArgSpec, PkgVersion, Vars};

use crate::error::{BringError, Result};

/// Build the argument schema for `versions`.
///
/// Every variable that is not a fixed source var becomes an argument whose
/// allowed values are listed in first-seen order. Derived arguments carry no
/// default and are optional; `overrides` may set docs, defaults, aliases and
/// `required`, and may introduce arguments no version uses.
pub fn derive(
    versions: &[PkgVersion],
    aliases: &Aliases,
    fixed: &Vars,
    overrides: &BTreeMap<String, ArgOverride>,
) -> ArgSchema {
    let mut schema = ArgSchema::new();
    for version in versions {
        for (key, value) in &version.variables {
            if fixed.contains_key(key) {
                continue;
            }
            let spec = schema.entry(key.clone()).or_insert_with(|| ArgSpec {
                aliases: aliases.get(key).cloned().unwrap_or_default(),
                ..ArgSpec::default()
            });
            if !spec.allowed.contains(value) {
                spec.allowed.push(value.clone());
            }
        }
    }

    for (name, over) in overrides {
        let spec = schema.entry(name.clone()).or_default();
        if over.doc.is_some() {
            spec.doc.clone_from(&over.doc);
        }
        if over.default.is_some() {
            spec.default.clone_from(&over.default);
        }
        if let Some(required) = over.required {
            spec.required = required;
        }
        spec.aliases
            .extend(over.aliases.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    schema
}

/// Fill arguments the caller did not supply from schema defaults, then check
/// that every required argument has a value.
///
/// # Errors
///
/// Returns [`BringError::Config`] naming the first missing required argument.
pub fn apply_defaults(package: &str, requested: &Vars, schema: &ArgSchema) -> Result<Vars> {
    let mut vars = requested.clone();
    for (name, spec) in schema {
        if vars.contains_key(name) {
            continue;
        }
        if let Some(default) = &spec.default {
            vars.insert(name.clone(), default.clone());
        } else if spec.required {
            return Err(BringError::Config(format!(
                "package '{package}' requires argument '{name}'"
            )));
        }
    }
    Ok(vars)
}
