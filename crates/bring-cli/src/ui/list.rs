//! Column-aligned rendering for `bring list` and `bring info`.

use bring_core::Package;
use bring_schema::{Catalog, format_vars, scalar_to_string};
use crossterm::style::Stylize;

use super::theme::Theme;

pub fn list_header() -> String {
    let theme = Theme::default();
    let header = format!(
        "  {:<nw$} {:<vw$} {}",
        "name",
        "source",
        "description",
        nw = theme.layout.name_width,
        vw = theme.layout.version_width,
    );
    header.dark_grey().to_string()
}

pub fn list_row(index: &str, pkg: &Package) -> String {
    let theme = Theme::default();
    let name = format!("{:<width$}", format!("{index}.{}", pkg.name), width = theme.layout.name_width);
    let kind = format!("{:<width$}", pkg.source.kind, width = theme.layout.version_width);
    format!(
        "  {} {} {}",
        name.with(theme.colors.package_name),
        kind.with(theme.colors.version),
        pkg.info.desc.as_str().with(theme.colors.secondary)
    )
}

pub fn list_footer(packages: usize, indexes: usize) -> String {
    format!("  {packages} packages in {indexes} indexes")
        .dark_grey()
        .to_string()
}

/// Lines describing a package and its catalog.
pub fn info_lines(pkg: &Package, catalog: &Catalog) -> Vec<String> {
    let theme = Theme::default();
    let lw = theme.layout.label_width;
    let mut lines = vec![
        String::new(),
        format!(
            "  {} {}",
            pkg.name.as_str().white().bold(),
            catalog.source_id.as_str().dark_grey()
        ),
    ];
    if !pkg.info.desc.is_empty() {
        lines.push(format!("  {}", pkg.info.desc));
    }
    lines.push(String::new());
    if let Some(homepage) = &pkg.info.homepage {
        lines.push(format!("  {:<lw$}{homepage}", "homepage"));
    }
    lines.push(format!("  {:<lw$}{}", "source", catalog.resolver));
    lines.push(format!(
        "  {:<lw$}{}",
        "resolved",
        catalog.built_at.format("%Y-%m-%d %H:%M")
    ));
    lines.push(format!("  {:<lw$}{}", "versions", catalog.versions.len()));

    if !catalog.args.is_empty() {
        lines.push(String::new());
        lines.push(format!("  {}", "arguments".dark_grey()));
        for (name, spec) in &catalog.args {
            let mut line = format!("  {:<lw$}", name.as_str());
            let allowed: Vec<String> = spec.allowed.iter().map(scalar_to_string).collect();
            line.push_str(&allowed.join(", "));
            if let Some(default) = &spec.default {
                line.push_str(&format!(" (default {})", scalar_to_string(default)));
            }
            if spec.required {
                line.push_str(" (required)");
            }
            lines.push(line);
            if let Some(doc) = &spec.doc {
                lines.push(format!("  {:<lw$}{}", "", doc.as_str().dark_grey()));
            }
        }
    }

    let aliases: Vec<String> = catalog
        .aliases
        .iter()
        .flat_map(|(key, table)| {
            table
                .iter()
                .map(move |(alias, value)| format!("{key}={alias} -> {}", scalar_to_string(value)))
        })
        .collect();
    if !aliases.is_empty() {
        lines.push(String::new());
        lines.push(format!("  {}", "aliases".dark_grey()));
        lines.extend(aliases.into_iter().map(|a| format!("  {a}")));
    }

    if !catalog.versions.is_empty() {
        lines.push(String::new());
        lines.push(format!("  {}", "combinations".dark_grey()));
        for version in &catalog.versions {
            lines.push(format!("  {}", format_vars(&version.variables)));
        }
    }
    lines
}
