//! List command

use bring_core::{Bring, PackageIndex};

use crate::ui::list::{list_footer, list_header, list_row};

/// List every package of every loaded index.
pub fn list(bring: &Bring) {
    let indexes = bring.indexes().indexes();
    let total: usize = indexes.iter().map(PackageIndex::len).sum();
    if total == 0 {
        println!();
        println!("  No packages found.");
        println!("  Add package definitions under an index directory, or pass --index DIR.");
        return;
    }

    println!("{}", list_header());
    for index in indexes {
        for pkg in index.packages() {
            println!("{}", list_row(&index.name, pkg));
        }
    }
    println!();
    println!("{}", list_footer(total, indexes.len()));
}
