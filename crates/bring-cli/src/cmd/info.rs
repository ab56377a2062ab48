//! Info command

use anyhow::Result;
use bring_core::Bring;

use crate::ui::list::info_lines;

/// Show a package's catalog: arguments, aliases and valid combinations.
pub async fn info(bring: &Bring, package: &str, json: bool) -> Result<()> {
    let catalog = bring.explain(package).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }
    let (_, pkg) = bring.indexes().find(package)?;
    for line in info_lines(pkg, &catalog) {
        println!("{line}");
    }
    Ok(())
}
