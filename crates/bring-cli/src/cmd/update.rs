//! Update command

use anyhow::{Result, bail};
use bring_core::Bring;
use crossterm::style::Stylize;

/// Refresh catalogs, reporting each package. Fails if any refresh failed.
pub async fn update(bring: &Bring, packages: &[String], force: bool) -> Result<()> {
    let results = bring.update_metadata(packages, force).await;
    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(versions) => println!("  {} {name} ({versions} versions)", "ok".green()),
            Err(e) => {
                failed += 1;
                println!("  {} {name}: {e}", "failed".red());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} package(s) failed to update", results.len());
    }
    Ok(())
}
